//! Caddy collector: reverse-proxy routes from the Caddy admin API.

use crate::collector::{Collector, SourceSnapshot};
use crate::config::SystemConfig;
use crate::http::BackendClient;
use crate::naming::name_from_host;
use crate::safety::{endpoint, validate_discovery_url};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use lantern_protocol::{AppStatus, DiscoveredApp, SourceKind};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
struct Server {
    #[serde(default)]
    listen: Vec<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Default, Deserialize)]
struct Route {
    #[serde(default, rename = "match")]
    matchers: Vec<Matcher>,
    #[serde(default)]
    handle: Vec<Handler>,
}

#[derive(Debug, Default, Deserialize)]
struct Matcher {
    #[serde(default)]
    host: Vec<String>,
    #[serde(default)]
    path: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Handler {
    #[serde(default)]
    handler: String,
    #[serde(default)]
    upstreams: Vec<Upstream>,
    /// Nested routes of a `subroute` handler.
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Default, Deserialize)]
struct Upstream {
    #[serde(default)]
    dial: String,
}

impl Server {
    fn plain_http_only(&self) -> bool {
        !self.listen.is_empty() && self.listen.iter().all(|addr| addr.ends_with(":80"))
    }
}

/// First upstream of the first `reverse_proxy` handler, searching subroutes.
fn first_upstream(handlers: &[Handler]) -> Option<&str> {
    handlers.iter().find_map(|h| {
        if h.handler == "reverse_proxy" {
            return Some(h.upstreams.first().map_or("", |u| u.dial.as_str()));
        }
        h.routes.iter().find_map(|route| first_upstream(&route.handle))
    })
}

#[derive(Debug, Clone)]
pub struct CaddyCollector {
    client: BackendClient,
}

impl CaddyCollector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn query(&self, caddy_url: &str) -> Result<Vec<DiscoveredApp>> {
        let base = validate_discovery_url(caddy_url)?;
        let request = self
            .client
            .inner()
            .get(endpoint(&base, "/config/apps/http/servers"));
        // Caddy answers `null` when no http app is configured.
        let servers: Option<BTreeMap<String, Server>> = self.client.fetch_json(request).await?;
        Ok(servers
            .unwrap_or_default()
            .values()
            .flat_map(server_apps)
            .collect())
    }
}

#[async_trait]
impl Collector for CaddyCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Caddy
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        if config.caddy.url.trim().is_empty() {
            return Err(DiscoveryError::Config("caddy url is required".to_string()));
        }
        let apps = self.query(&config.caddy.url).await?;
        Ok(SourceSnapshot::new(SourceKind::Caddy, apps))
    }
}

fn server_apps(server: &Server) -> Vec<DiscoveredApp> {
    let scheme = if server.plain_http_only() { "http" } else { "https" };
    let mut apps = Vec::new();

    for route in &server.routes {
        let Some(upstream) = first_upstream(&route.handle) else {
            continue;
        };
        for matcher in &route.matchers {
            let Some(host) = matcher
                .host
                .iter()
                .map(|h| h.trim())
                .find(|h| !h.is_empty() && !h.contains('*'))
            else {
                continue;
            };
            let path = matcher
                .path
                .first()
                .map(|p| p.trim_end_matches('*').trim_end_matches('/'))
                .unwrap_or_default();

            apps.push(DiscoveredApp {
                name: name_from_host(host),
                url: format!("{scheme}://{host}{path}"),
                icon: String::new(),
                description: format!("Discovered via Caddy (proxied to {upstream})"),
                status: AppStatus::Online,
            });
        }
    }
    apps
}
