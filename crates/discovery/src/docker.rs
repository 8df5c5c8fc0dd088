//! Docker Engine collector: containers that opt in through `lantern.*` labels.

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

pub const URL_LABEL: &str = "lantern.url";
pub const NAME_LABEL: &str = "lantern.name";
pub const ICON_LABEL: &str = "lantern.icon";
pub const DESCRIPTION_LABEL: &str = "lantern.description";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct DockerCollector {
    client: BackendClient,
}

impl DockerCollector {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn query(&self, docker_url: &str) -> Result<Vec<DiscoveredApp>> {
        let base = validate_discovery_url(docker_url)?;
        let mut url = endpoint(&base, "/containers/json");
        url.set_query(Some("all=true"));

        let containers: Vec<ContainerSummary> =
            self.client.fetch_json(self.client.inner().get(url)).await?;
        Ok(containers.into_iter().filter_map(container_app).collect())
    }
}

#[async_trait]
impl Collector for DockerCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Docker
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        if config.docker.url.trim().is_empty() {
            return Err(DiscoveryError::Config("docker url is required".to_string()));
        }
        let apps = self.query(&config.docker.url).await?;
        Ok(SourceSnapshot::new(SourceKind::Docker, apps))
    }
}

fn container_app(container: ContainerSummary) -> Option<DiscoveredApp> {
    let labels = container.labels.unwrap_or_default();
    let label = |key: &str| {
        labels
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let url = label(URL_LABEL)?;
    let name = label(NAME_LABEL).unwrap_or_else(|| {
        container
            .names
            .first()
            .map(|n| display_name(n.trim_start_matches('/')))
            .unwrap_or_else(|| "Unknown".to_string())
    });

    Some(DiscoveredApp {
        name,
        url,
        icon: label(ICON_LABEL).unwrap_or_default(),
        description: label(DESCRIPTION_LABEL)
            .unwrap_or_else(|| format!("Discovered via Docker (image: {})", container.image)),
        status: AppStatus::from_running(container.state.eq_ignore_ascii_case("running")),
    })
}
