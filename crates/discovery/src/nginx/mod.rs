//! Reverse-proxy configuration collector.
//!
//! Reads every config file in one directory, inlines `include` directives
//! under the configured roots, and turns proxied `server`/`location` blocks
//! into apps.

mod filter;
mod include;
mod parse;

use crate::collector::{Collector, SourceSnapshot};
use crate::config::SystemConfig;
use crate::safety::IncludePolicy;
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use include::{read_config_file, resolve_includes, IncludeContext};
use lantern_protocol::{DiscoveredApp, SourceKind};
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct NginxCollector;

#[async_trait]
impl Collector for NginxCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Nginx
    }

    async fn collect(&self, config: &SystemConfig) -> Result<SourceSnapshot> {
        let dir = config.nginx.effective_config_path();
        let policy = IncludePolicy::new(config.nginx.effective_include_roots());

        let apps = match tokio::task::spawn_blocking(move || discover_dir(&dir, &policy)).await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(DiscoveryError::Backend(e.to_string())),
        };
        Ok(SourceSnapshot::new(SourceKind::Nginx, apps))
    }
}

/// Parses every config file directly inside `dir`, in file-name order.
pub fn discover_dir(dir: &Path, policy: &IncludePolicy) -> Result<Vec<DiscoveredApp>> {
    let meta = std::fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(DiscoveryError::Config(format!(
            "nginx config path is not a directory: {}",
            dir.display()
        )));
    }

    let ctx = IncludeContext {
        policy: policy.clone(),
        base_dir: include_base(dir),
    };

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| !t.is_dir()))
        .filter(|entry| filter::is_config_file(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    files.sort();

    let mut seen = HashSet::new();
    let mut apps = Vec::new();
    for path in files {
        let Some(content) = read_config_file(&path) else {
            continue;
        };
        let inlined = resolve_includes(&content, 0, &ctx);
        let found = parse::apps_from_document(&inlined, &mut seen);
        debug!("nginx: {} app(s) in {}", found.len(), path.display());
        apps.extend(found);
    }

    Ok(filter::dedupe_by_base_path(apps))
}

/// Relative includes resolve against the nginx prefix, which for a
/// `conf.d`-style layout is the parent of the scanned directory.
fn include_base(dir: &Path) -> PathBuf {
    dir.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(dir)
        .to_path_buf()
}
