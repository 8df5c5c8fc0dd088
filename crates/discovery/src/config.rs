use crate::limits::{
    clamp_interval_secs, parse_interval_secs, DEFAULT_DISCOVERY_INTERVAL, DEFAULT_HTTP_TIMEOUT,
};
use crate::{DiscoveryError, Result};
use lantern_protocol::SourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_NGINX_CONFIG_PATH: &str = "/etc/nginx/conf.d";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NginxConfig {
    pub enabled: bool,
    pub config_path: Option<PathBuf>,
    /// Directories include directives may read from. Defaults to the config
    /// directory and its parent.
    pub include_roots: Vec<PathBuf>,
}

impl NginxConfig {
    pub fn effective_config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_NGINX_CONFIG_PATH))
    }

    pub fn effective_include_roots(&self) -> Vec<PathBuf> {
        if !self.include_roots.is_empty() {
            return self.include_roots.clone();
        }
        let dir = self.effective_config_path();
        let mut roots = vec![dir.clone()];
        if let Some(parent) = dir.parent().filter(|p| *p != Path::new("/")) {
            roots.push(parent.to_path_buf());
        }
        roots
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DockerConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TraefikConfig {
    pub enabled: bool,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NpmConfig {
    pub enabled: bool,
    pub url: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaddyConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnraidConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
}

/// Per-source enablement and connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SystemConfig {
    pub discovery_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub nginx: NginxConfig,
    pub docker: DockerConfig,
    pub traefik: TraefikConfig,
    pub npm: NpmConfig,
    pub caddy: CaddyConfig,
    pub unraid: UnraidConfig,
    /// Sources switched on by an environment flag rather than the config file.
    #[serde(skip)]
    pub env_forced: BTreeSet<SourceKind>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL.as_secs(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            nginx: NginxConfig::default(),
            docker: DockerConfig::default(),
            traefik: TraefikConfig::default(),
            npm: NpmConfig::default(),
            caddy: CaddyConfig::default(),
            unraid: UnraidConfig::default(),
            env_forced: BTreeSet::new(),
        }
    }
}

impl SystemConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DiscoveryError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(clamp_interval_secs(self.discovery_interval_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        if self.http_timeout_secs == 0 {
            return DEFAULT_HTTP_TIMEOUT;
        }
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Docker => self.docker.enabled,
            SourceKind::Nginx => self.nginx.enabled,
            SourceKind::Traefik => self.traefik.enabled,
            SourceKind::Npm => self.npm.enabled,
            SourceKind::Caddy => self.caddy.enabled,
            SourceKind::Unraid => self.unraid.enabled,
        }
    }

    pub fn set_enabled(&mut self, kind: SourceKind, enabled: bool) {
        match kind {
            SourceKind::Docker => self.docker.enabled = enabled,
            SourceKind::Nginx => self.nginx.enabled = enabled,
            SourceKind::Traefik => self.traefik.enabled = enabled,
            SourceKind::Npm => self.npm.enabled = enabled,
            SourceKind::Caddy => self.caddy.enabled = enabled,
            SourceKind::Unraid => self.unraid.enabled = enabled,
        }
    }

    /// Whether the connection parameters a source needs are present.
    pub fn has_connection(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Nginx => true,
            SourceKind::Docker => !self.docker.url.trim().is_empty(),
            SourceKind::Traefik => !self.traefik.url.trim().is_empty(),
            SourceKind::Npm => {
                !self.npm.url.trim().is_empty()
                    && !self.npm.email.trim().is_empty()
                    && !self.npm.password.is_empty()
            }
            SourceKind::Caddy => !self.caddy.url.trim().is_empty(),
            SourceKind::Unraid => {
                !self.unraid.url.trim().is_empty() && !self.unraid.api_key.trim().is_empty()
            }
        }
    }

    /// Enabled and startable.
    pub fn should_run(&self, kind: SourceKind) -> bool {
        self.is_enabled(kind) && self.has_connection(kind)
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Layers environment overrides on top of the file configuration.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| get(key).is_some_and(|v| v == "true");

        if let Some(raw) = get("LANTERN_DISCOVERY_INTERVAL_SECS") {
            self.discovery_interval_secs =
                parse_interval_secs(Some(&raw), self.discovery_interval_secs);
        }

        if let Some(path) = get("NGINX_CONFIG_PATH") {
            self.nginx.config_path = Some(PathBuf::from(path));
        }
        if let Some(url) = get("DOCKER_URL") {
            self.docker.url = url;
        }
        if let Some(url) = get("TRAEFIK_URL") {
            self.traefik.url = url;
        }
        if let Some(user) = get("TRAEFIK_USERNAME") {
            self.traefik.username = Some(user);
        }
        if let Some(pass) = get("TRAEFIK_PASSWORD") {
            self.traefik.password = Some(pass);
        }
        if let Some(url) = get("NPM_URL") {
            self.npm.url = url;
        }
        if let Some(email) = get("NPM_EMAIL") {
            self.npm.email = email;
        }
        if let Some(pass) = get("NPM_PASSWORD") {
            self.npm.password = pass;
        }
        if let Some(url) = get("CADDY_URL") {
            self.caddy.url = url;
        }
        if let Some(url) = get("UNRAID_URL") {
            self.unraid.url = url;
        }
        if let Some(key) = get("UNRAID_API_KEY") {
            self.unraid.api_key = key;
        }

        for kind in SourceKind::ALL {
            let var = format!("{}_DISCOVERY", kind.as_str().to_ascii_uppercase());
            if flag(&var) && self.has_connection(kind) {
                self.set_enabled(kind, true);
                self.env_forced.insert(kind);
            }
        }
    }
}

/// Shared, lock-guarded configuration. Independent of discovery state.
#[derive(Debug, Default)]
pub struct ConfigProvider {
    inner: RwLock<SystemConfig>,
}

impl ConfigProvider {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Copy of the current configuration; the lock is released on return.
    pub fn snapshot(&self) -> SystemConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SystemConfig) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
