//! Persistence for administrator overrides, keyed by app URL.

use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use lantern_protocol::DiscoveredAppOverride;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

pub type OverrideMap = BTreeMap<String, DiscoveredAppOverride>;

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn get(&self, url: &str) -> Result<Option<DiscoveredAppOverride>>;

    async fn get_all(&self) -> Result<OverrideMap>;

    async fn save(&self, record: DiscoveredAppOverride) -> Result<()>;

    /// Saves several records. Implementations may leave earlier records
    /// written if a later one fails.
    async fn save_batch(&self, records: Vec<DiscoveredAppOverride>) -> Result<()>;

    /// Removing an absent URL is not an error.
    async fn delete(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    records: RwLock<OverrideMap>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn get(&self, url: &str) -> Result<Option<DiscoveredAppOverride>> {
        Ok(self.records.read().await.get(url).cloned())
    }

    async fn get_all(&self) -> Result<OverrideMap> {
        Ok(self.records.read().await.clone())
    }

    async fn save(&self, record: DiscoveredAppOverride) -> Result<()> {
        self.records.write().await.insert(record.url.clone(), record);
        Ok(())
    }

    async fn save_batch(&self, records: Vec<DiscoveredAppOverride>) -> Result<()> {
        let mut guard = self.records.write().await;
        for record in records {
            guard.insert(record.url.clone(), record);
        }
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.records.write().await.remove(url);
        Ok(())
    }
}

/// Overrides kept in one JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonFileOverrideStore {
    path: PathBuf,
    records: Mutex<OverrideMap>,
}

impl JsonFileOverrideStore {
    /// Opens the store, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let list: Vec<DiscoveredAppOverride> = serde_json::from_slice(&bytes)
                .map_err(|e| DiscoveryError::Store(format!("{}: {e}", path.display())))?;
            list.into_iter().map(|o| (o.url.clone(), o)).collect()
        } else {
            OverrideMap::new()
        };
        debug!("loaded {} override(s) from {}", records.len(), path.display());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &OverrideMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&DiscoveredAppOverride> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Applies `change` to a copy and commits it only if the write succeeds.
    async fn modify(&self, change: impl FnOnce(&mut OverrideMap) + Send) -> Result<()> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for JsonFileOverrideStore {
    async fn get(&self, url: &str) -> Result<Option<DiscoveredAppOverride>> {
        Ok(self.records.lock().await.get(url).cloned())
    }

    async fn get_all(&self) -> Result<OverrideMap> {
        Ok(self.records.lock().await.clone())
    }

    async fn save(&self, record: DiscoveredAppOverride) -> Result<()> {
        self.modify(|map| {
            map.insert(record.url.clone(), record);
        })
        .await
    }

    async fn save_batch(&self, records: Vec<DiscoveredAppOverride>) -> Result<()> {
        self.modify(|map| {
            for record in records {
                map.insert(record.url.clone(), record);
            }
        })
        .await
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.modify(|map| {
            map.remove(url);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(url: &str, category: &str) -> DiscoveredAppOverride {
        DiscoveredAppOverride {
            url: url.to_string(),
            category: category.to_string(),
            ..DiscoveredAppOverride::default()
        }
    }

    #[tokio::test]
    async fn memory_store_upserts_and_deletes() {
        let store = MemoryOverrideStore::new();
        store.save(record("http://a", "one")).await.unwrap();
        store.save(record("http://a", "two")).await.unwrap();
        store
            .save_batch(vec![record("http://b", "x"), record("http://c", "y")])
            .await
            .unwrap();
        store.delete("http://c").await.unwrap();
        store.delete("http://missing").await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["http://a", "http://b"]);
        assert_eq!(store.get("http://a").await.unwrap().unwrap().category, "two");
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("overrides.json");

        let store = JsonFileOverrideStore::open(&path).await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        store
            .save_batch(vec![record("http://a", "media"), record("http://b", "tools")])
            .await
            .unwrap();
        store.delete("http://b").await.unwrap();
        drop(store);

        let reopened = JsonFileOverrideStore::open(&path).await.unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["http://a"].category, "media");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_json_is_a_store_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("overrides.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileOverrideStore::open(&path).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Store(_)));
    }
}
