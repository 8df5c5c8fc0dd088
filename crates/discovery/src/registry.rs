use crate::collector::SourceSnapshot;
use lantern_protocol::{DiscoveredApp, RawDiscoveredApp, SourceKind};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Latest snapshot per source, one lock per source.
///
/// Readers get an `Arc` to a whole snapshot, so a reader never sees half of
/// a replacement.
#[derive(Debug)]
pub struct SourceRegistry {
    slots: BTreeMap<SourceKind, RwLock<Arc<SourceSnapshot>>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        let slots = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(Arc::new(SourceSnapshot::empty(kind)))))
            .collect();
        Self { slots }
    }

    pub fn snapshot(&self, kind: SourceKind) -> Arc<SourceSnapshot> {
        match self.slots.get(&kind) {
            Some(slot) => slot.read().unwrap_or_else(PoisonError::into_inner).clone(),
            None => Arc::new(SourceSnapshot::empty(kind)),
        }
    }

    pub fn replace(&self, snapshot: SourceSnapshot) {
        if let Some(slot) = self.slots.get(&snapshot.source) {
            *slot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        }
    }

    pub fn clear(&self, kind: SourceKind) {
        self.replace(SourceSnapshot::empty(kind));
    }

    /// Every app across all sources, tagged with its source.
    ///
    /// Sources are visited in `SourceKind::ALL` order and a URL reported by
    /// more than one source is kept from the first.
    pub fn raw_apps(&self) -> Vec<RawDiscoveredApp> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for kind in self.slots.keys() {
            let snapshot = self.snapshot(*kind);
            for app in &snapshot.apps {
                if seen.insert(app.url.clone()) {
                    out.push(RawDiscoveredApp {
                        app: app.clone(),
                        source: *kind,
                    });
                }
            }
        }
        out
    }

    pub fn all_apps(&self) -> Vec<DiscoveredApp> {
        self.raw_apps().into_iter().map(|raw| raw.app).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_protocol::AppStatus;
    use pretty_assertions::assert_eq;

    fn app(url: &str) -> DiscoveredApp {
        DiscoveredApp {
            name: url.to_string(),
            url: url.to_string(),
            icon: String::new(),
            description: String::new(),
            status: AppStatus::Online,
        }
    }

    #[test]
    fn aggregate_prefers_earlier_sources_for_shared_urls() {
        let registry = SourceRegistry::new();
        registry.replace(SourceSnapshot::new(
            SourceKind::Unraid,
            vec![app("http://shared"), app("http://unraid-only")],
        ));
        registry.replace(SourceSnapshot::new(SourceKind::Docker, vec![app("http://shared")]));

        let raw: Vec<(String, SourceKind)> = registry
            .raw_apps()
            .into_iter()
            .map(|r| (r.app.url, r.source))
            .collect();
        assert_eq!(
            raw,
            vec![
                ("http://shared".to_string(), SourceKind::Docker),
                ("http://unraid-only".to_string(), SourceKind::Unraid),
            ]
        );
    }

    #[test]
    fn clear_empties_only_that_source() {
        let registry = SourceRegistry::new();
        registry.replace(SourceSnapshot::new(SourceKind::Nginx, vec![app("http://n")]));
        registry.replace(SourceSnapshot::new(SourceKind::Caddy, vec![app("http://c")]));
        registry.clear(SourceKind::Nginx);
        assert!(registry.snapshot(SourceKind::Nginx).is_empty());
        assert_eq!(registry.all_apps(), vec![app("http://c")]);
    }
}
