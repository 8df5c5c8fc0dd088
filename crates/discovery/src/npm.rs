//! Nginx Proxy Manager collector: proxy hosts from the NPM admin API.

use crate::collector::{Collector, SourceSnapshot};
use crate::config::SystemConfig;
use crate::http::BackendClient;
use crate::naming::name_from_host;
use crate::safety::{endpoint, validate_discovery_url};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use lantern_protocol::{AppStatus, DiscoveredApp, SourceKind};
use serde::{Deserialize, Deserializer};
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ProxyHost {
    #[serde(default)]
    domain_names: Vec<String>,
    #[serde(default)]
    forward_scheme: String,
    #[serde(default)]
    forward_host: String,
    #[serde(default)]
    forward_port: u16,
    #[serde(default, deserialize_with = "flexible_bool")]
    ssl_forced: bool,
    #[serde(default)]
    certificate_id: serde_json::Value,
    #[serde(default = "enabled_default", deserialize_with = "flexible_bool")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

/// NPM reports booleans as `true`/`false` or `1`/`0` depending on version.
fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

impl ProxyHost {
    fn has_certificate(&self) -> bool {
        match &self.certificate_id {
            serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
            // "new" while a certificate is being requested
            serde_json::Value::String(s) => !s.is_empty() && s != "0",
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NpmCollector {
    client: BackendClient,
}

impl NpmCollector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    async fn login(&self, base: &Url, email: &str, password: &str) -> Result<String> {
        let request = self
            .client
            .inner()
            .post(endpoint(base, "/api/tokens"))
            .json(&serde_json::json!({ "identity": email, "secret": password }));
        let response: TokenResponse = self.client.fetch_json(request).await?;
        Ok(response.token)
    }

    pub async fn query(&self, npm_url: &str, email: &str, password: &str) -> Result<Vec<DiscoveredApp>> {
        let base = validate_discovery_url(npm_url)?;
        let token = self.login(&base, email, password).await?;

        let request = self
            .client
            .inner()
            .get(endpoint(&base, "/api/nginx/proxy-hosts"))
            .bearer_auth(token);
        let hosts: Vec<ProxyHost> = self.client.fetch_json(request).await?;
        Ok(hosts.into_iter().filter_map(host_app).collect())
    }
}

#[async_trait]
impl Collector for NpmCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Npm
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        if !config.has_connection(SourceKind::Npm) {
            return Err(DiscoveryError::Config(
                "npm url, email and password are required".to_string(),
            ));
        }
        let cfg = &config.npm;
        let apps = self.query(&cfg.url, &cfg.email, &cfg.password).await?;
        Ok(SourceSnapshot::new(SourceKind::Npm, apps))
    }
}

fn host_app(host: ProxyHost) -> Option<DiscoveredApp> {
    let domain = host
        .domain_names
        .iter()
        .map(|d| d.trim())
        .find(|d| !d.is_empty() && !d.starts_with('*'))?
        .to_string();
    let scheme = if host.ssl_forced || host.has_certificate() {
        "https"
    } else {
        "http"
    };
    let forward_scheme = if host.forward_scheme.is_empty() {
        "http"
    } else {
        host.forward_scheme.as_str()
    };

    Some(DiscoveredApp {
        name: name_from_host(&domain),
        url: format!("{scheme}://{domain}"),
        icon: String::new(),
        description: format!(
            "Discovered via Nginx Proxy Manager (proxied to {forward_scheme}://{}:{})",
            host.forward_host, host.forward_port
        ),
        status: AppStatus::from_running(host.enabled),
    })
}
