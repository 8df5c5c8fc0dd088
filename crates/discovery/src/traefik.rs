//! Traefik collector: HTTP routers from the Traefik API.

use crate::collector::{Collector, SourceSnapshot};
use crate::config::SystemConfig;
use crate::http::BackendClient;
use crate::naming::{display_name, name_from_host};
use crate::safety::{endpoint, validate_discovery_url};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use lantern_protocol::{AppStatus, DiscoveredApp, SourceKind};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

const TLS_ENTRY_POINTS: &[&str] = &["websecure", "https"];

fn host_rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Host\(\s*`([^`]+)`")
            .unwrap_or_else(|e| unreachable!("invalid builtin regex: {e}"))
    })
}

fn path_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"PathPrefix\(\s*`([^`]+)`")
            .unwrap_or_else(|e| unreachable!("invalid builtin regex: {e}"))
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Router {
    #[serde(default)]
    name: String,
    #[serde(default)]
    rule: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    entry_points: Vec<String>,
    #[serde(default)]
    tls: Option<serde_json::Value>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone)]
pub struct TraefikCollector {
    client: BackendClient,
}

impl TraefikCollector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn query(
        &self,
        traefik_url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Vec<DiscoveredApp>> {
        let base = validate_discovery_url(traefik_url)?;
        let mut request = self
            .client
            .inner()
            .get(endpoint(&base, "/api/http/routers"));
        if let Some(user) = username.filter(|u| !u.is_empty()) {
            request = request.basic_auth(user, password);
        }

        let routers: Vec<Router> = self.client.fetch_json(request).await?;
        Ok(prefer_https(
            routers.into_iter().filter_map(router_app).collect(),
        ))
    }
}

#[async_trait]
impl Collector for TraefikCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Traefik
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        let cfg = &config.traefik;
        if cfg.url.trim().is_empty() {
            return Err(DiscoveryError::Config("traefik url is required".to_string()));
        }
        let apps = self
            .query(&cfg.url, cfg.username.as_deref(), cfg.password.as_deref())
            .await?;
        Ok(SourceSnapshot::new(SourceKind::Traefik, apps))
    }
}

fn router_app(router: Router) -> Option<DiscoveredApp> {
    if router.service.ends_with("@internal") || router.name.ends_with("@internal") {
        return None;
    }
    let host = host_rule_re().captures(&router.rule)?[1].trim().to_string();
    let path = path_prefix_re()
        .captures(&router.rule)
        .map(|caps| caps[1].trim().to_string())
        .filter(|p| p != "/")
        .unwrap_or_default();

    let https = router.tls.is_some()
        || router
            .entry_points
            .iter()
            .any(|ep| TLS_ENTRY_POINTS.contains(&ep.as_str()));
    let scheme = if https { "https" } else { "http" };

    let base_name = router.name.split('@').next().unwrap_or_default();
    let name = if base_name.is_empty() {
        name_from_host(&host)
    } else {
        display_name(base_name)
    };
    let service = router.service.split('@').next().unwrap_or_default();

    Some(DiscoveredApp {
        name,
        url: format!("{scheme}://{host}{path}"),
        icon: String::new(),
        description: format!("Discovered via Traefik (service: {service})"),
        status: AppStatus::from_running(router.status.eq_ignore_ascii_case("enabled")),
    })
}

/// Drops `http://x` when `https://x` was also found; plain-HTTP routers
/// are usually redirect shims for the TLS one.
fn prefer_https(apps: Vec<DiscoveredApp>) -> Vec<DiscoveredApp> {
    let secure: HashSet<String> = apps
        .iter()
        .filter_map(|app| app.url.strip_prefix("https://").map(str::to_string))
        .collect();
    apps.into_iter()
        .filter(|app| {
            app.url
                .strip_prefix("http://")
                .map_or(true, |rest| !secure.contains(rest))
        })
        .collect()
}
