//! Joins live discovery results with persisted overrides.

use crate::error::{ReconcileError, ValidationError};
use crate::registry::SourceRegistry;
use crate::store::OverrideStore;
use lantern_protocol::{
    ActiveApp, BulkAction, BulkRequest, DiscoveredAppOverride, DiscoveredAppsView, SourceKind,
    MAX_BULK_URLS,
};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Checks a bulk request in order: URL count first, then the action.
pub fn validate_bulk(request: &BulkRequest) -> std::result::Result<BulkAction, ValidationError> {
    if request.urls.is_empty() {
        return Err(ValidationError::NoUrls);
    }
    if request.urls.len() > MAX_BULK_URLS {
        return Err(ValidationError::TooManyUrls { max: MAX_BULK_URLS });
    }
    request
        .action
        .parse::<BulkAction>()
        .map_err(ValidationError::InvalidAction)
}

/// Trims entries, drops blanks and repeats; keeps the caller's order.
pub fn normalize_groups(groups: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty() && seen.insert(*g))
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn OverrideStore>,
}

impl Reconciler {
    pub fn new(registry: Arc<SourceRegistry>, store: Arc<dyn OverrideStore>) -> Self {
        Self { registry, store }
    }

    /// Live apps with their overrides applied, plus overrides whose URL is no
    /// longer discovered by any source.
    pub async fn view(&self) -> Result<DiscoveredAppsView> {
        let raw = self.registry.raw_apps();
        let mut overrides = self.store.get_all().await?;

        let active = raw
            .into_iter()
            .map(|raw| {
                let record = overrides.remove(&raw.app.url);
                let mut app = raw.app;
                let (hidden, category, groups, overridden) = match record {
                    Some(o) => {
                        if let Some(name) = o.name.filter(|n| !n.trim().is_empty()) {
                            app.name = name;
                        }
                        if let Some(icon) = o.icon.filter(|i| !i.trim().is_empty()) {
                            app.icon = icon;
                        }
                        (o.hidden, o.category, o.groups, true)
                    }
                    None => (false, String::new(), Vec::new(), false),
                };
                ActiveApp {
                    app,
                    source: raw.source,
                    hidden,
                    category,
                    groups,
                    overridden,
                }
            })
            .collect();

        // What is left no longer matches a live URL; the map keeps it sorted.
        let stale = overrides.into_values().collect();
        Ok(DiscoveredAppsView { active, stale })
    }

    /// URLs are exact keys and are stored as given; only a blank one is refused.
    pub async fn upsert(&self, mut record: DiscoveredAppOverride) -> Result<()> {
        if record.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl.into());
        }
        record.groups = normalize_groups(&record.groups);
        self.store.save(record).await?;
        Ok(())
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(ValidationError::MissingUrl.into());
        }
        self.store.delete(url).await?;
        Ok(())
    }

    /// Applies one action to up to [`MAX_BULK_URLS`] apps and saves the
    /// results in one batch. Returns how many overrides were written.
    ///
    /// A failed batch is reported as a whole; records the store wrote before
    /// failing are not rolled back.
    pub async fn bulk(&self, request: BulkRequest) -> Result<usize> {
        let action = validate_bulk(&request)?;

        let sources: HashMap<String, SourceKind> = self
            .registry
            .raw_apps()
            .into_iter()
            .map(|raw| (raw.app.url, raw.source))
            .collect();
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let groups = request
            .groups
            .as_deref()
            .map(normalize_groups)
            .filter(|g| !g.is_empty());

        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        for url in &request.urls {
            let url = url.as_str();
            if url.trim().is_empty() || !seen.insert(url) {
                continue;
            }
            let mut record = match self.store.get(url).await? {
                Some(existing) => existing,
                None => DiscoveredAppOverride::seeded(url, sources.get(url).copied()),
            };
            match action {
                BulkAction::Show => {
                    record.hidden = false;
                    if let Some(category) = category {
                        record.category = category.to_string();
                    }
                    if let Some(groups) = &groups {
                        record.groups = groups.clone();
                    }
                }
            }
            batch.push(record);
        }

        let updated = batch.len();
        self.store.save_batch(batch).await?;
        info!("bulk {action:?} applied to {updated} discovered app(s)");
        Ok(updated)
    }
}
