//! Unraid collector: Docker containers reported by the Unraid GraphQL API.

use crate::collector::{Collector, SourceSnapshot};
use crate::config::SystemConfig;
use crate::http::BackendClient;
use crate::naming::display_name;
use crate::safety::{endpoint, validate_discovery_url};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use lantern_protocol::{AppStatus, DiscoveredApp, SourceKind};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

const CONTAINERS_QUERY: &str = r"{
  docker {
    containers {
      id
      names
      state
      labels
      image
      autoStart
    }
  }
}";

const WEBUI_LABEL: &str = "net.unraid.docker.webui";
const ICON_LABEL: &str = "net.unraid.docker.icon";
const PORT_PLACEHOLDER: &str = "[PORT:";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlData {
    #[serde(default)]
    docker: DockerData,
}

#[derive(Debug, Default, Deserialize)]
struct DockerData {
    #[serde(default)]
    containers: Vec<UnraidContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnraidContainer {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Clone)]
pub struct UnraidCollector {
    client: BackendClient,
}

impl UnraidCollector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn query(&self, unraid_url: &str, api_key: &str) -> Result<Vec<DiscoveredApp>> {
        let base = validate_discovery_url(unraid_url)?;
        let request = self
            .client
            .inner()
            .post(endpoint(&base, "/graphql"))
            .header("x-api-key", api_key)
            .json(&serde_json::json!({ "query": CONTAINERS_QUERY }));

        let response: GraphQlResponse = self.client.fetch_json(request).await?;
        if let Some(first) = response.errors.first() {
            return Err(DiscoveryError::Backend(format!(
                "GraphQL error: {}",
                first.message
            )));
        }

        let host = base.host_str().unwrap_or_default();
        let containers = response.data.unwrap_or_default().docker.containers;
        Ok(containers
            .into_iter()
            .filter_map(|c| container_app(c, host, unraid_url))
            .collect())
    }
}

#[async_trait]
impl Collector for UnraidCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Unraid
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        let cfg = &config.unraid;
        if cfg.url.trim().is_empty() || cfg.api_key.trim().is_empty() {
            return Err(DiscoveryError::Config(
                "unraid url and api key are required".to_string(),
            ));
        }
        let apps = self.query(&cfg.url, &cfg.api_key).await?;
        Ok(SourceSnapshot::new(SourceKind::Unraid, apps))
    }
}

fn container_app(container: UnraidContainer, host: &str, unraid_url: &str) -> Option<DiscoveredApp> {
    let labels = container.labels.unwrap_or_default();
    let webui = labels.get(WEBUI_LABEL).filter(|v| !v.is_empty())?;

    let name = container
        .names
        .first()
        .map(|n| display_name(n.trim_start_matches('/')))
        .unwrap_or_else(|| "Unknown".to_string());

    let icon = labels
        .get(ICON_LABEL)
        .map(|icon| resolve_icon(icon, unraid_url))
        .unwrap_or_default();

    Some(DiscoveredApp {
        name,
        url: expand_webui(webui, host),
        icon,
        description: format!("Discovered via Unraid (image: {})", container.image),
        status: AppStatus::from_running(container.state.eq_ignore_ascii_case("running")),
    })
}

/// Fills the WebUI template: `[IP]` becomes `host`, `[PORT:n]` becomes `n`.
///
/// A `[PORT:` with no closing bracket stops substitution and leaves the rest
/// of the string untouched.
pub fn expand_webui(template: &str, host: &str) -> String {
    let mut result = template.replace("[IP]", host);
    while let Some(start) = result.find(PORT_PLACEHOLDER) {
        let Some(len) = result[start..].find(']') else {
            break;
        };
        let port = result[start + PORT_PLACEHOLDER.len()..start + len].to_string();
        result.replace_range(start..=start + len, &port);
    }
    result
}

/// Same as [`expand_webui`] but takes the host from the Unraid server URL.
/// An unparsable server URL leaves the template unchanged.
pub fn process_webui_url(template: &str, unraid_url: &str) -> String {
    match Url::parse(unraid_url) {
        Ok(url) => expand_webui(template, url.host_str().unwrap_or_default()),
        Err(_) => template.to_string(),
    }
}

/// Absolute icon URLs pass through; site-relative ones are served by the
/// Unraid host itself; anything else is dropped.
pub fn resolve_icon(icon: &str, unraid_url: &str) -> String {
    if icon.starts_with("http://") || icon.starts_with("https://") {
        icon.to_string()
    } else if icon.starts_with('/') {
        format!("{}{icon}", unraid_url.trim_end_matches('/'))
    } else {
        String::new()
    }
}
