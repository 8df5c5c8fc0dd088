use crate::caddy::CaddyCollector;
use crate::config::SystemConfig;
use crate::docker::DockerCollector;
use crate::http::BackendClient;
use crate::nginx::NginxCollector;
use crate::npm::NpmCollector;
use crate::traefik::TraefikCollector;
use crate::unraid::UnraidCollector;
use crate::Result;
use async_trait::async_trait;
use lantern_protocol::{DiscoveredApp, SourceKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

/// Point-in-time result of one collector run. Replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub source: SourceKind,
    pub apps: Vec<DiscoveredApp>,
    pub collected_at: SystemTime,
}

impl SourceSnapshot {
    /// Builds a snapshot, dropping later apps whose URL was already seen.
    pub fn new(source: SourceKind, apps: Vec<DiscoveredApp>) -> Self {
        Self {
            source,
            apps: dedupe_by_url(apps),
            collected_at: SystemTime::now(),
        }
    }

    pub fn empty(source: SourceKind) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// One discovery backend: external state in, canonical records out.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    fn source(&self) -> SourceKind;

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot>;

    /// Runs one collection and reports how many apps were found.
    async fn test_connection(&self, config: &SystemConfig) -> Result<usize> {
        Ok(self.collect(config).await?.len())
    }
}

/// One collector per [`SourceKind`], in `SourceKind::ALL` order.
pub fn default_collectors(client: BackendClient) -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(DockerCollector::new(client.clone())),
        Arc::new(NginxCollector),
        Arc::new(TraefikCollector::new(client.clone())),
        Arc::new(NpmCollector::new(client.clone())),
        Arc::new(CaddyCollector::new(client.clone())),
        Arc::new(UnraidCollector::new(client)),
    ]
}

pub(crate) fn dedupe_by_url(apps: Vec<DiscoveredApp>) -> Vec<DiscoveredApp> {
    let mut seen = HashSet::new();
    apps.into_iter()
        .filter(|app| seen.insert(app.url.clone()))
        .collect()
}
