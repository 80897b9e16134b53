use crate::storage::KeyValueStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Storage key the whole mapping is persisted under.
pub const TRANSLATION_STORAGE_KEY: &str = "tweet_translations";

/// Persisted item id -> translated text mapping.
///
/// The in-memory map is the source of truth for lookups. The durable copy
/// is one JSON object under a single key, shared by every queue that uses
/// the same store, so a translation done on one feed shows up on another.
pub struct TranslationCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    entries: RwLock<HashMap<String, String>>,
}

impl TranslationCache {
    /// Create an empty cache backed by `store`. Call [`load`](Self::load)
    /// (or use [`open`](Self::open)) to pull in persisted entries.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, TRANSLATION_STORAGE_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create and load in one step.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let cache = Self::new(store);
        cache.load().await;
        cache
    }

    /// Read the whole persisted mapping and replace the in-memory state with
    /// it. Missing or unreadable data yields an empty mapping; the failure is
    /// logged and never surfaced.
    pub async fn load(&self) -> HashMap<String, String> {
        let loaded = match self.read_persisted().await {
            Ok(Some(map)) => map,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Error loading stored translations: {:#}", e);
                HashMap::new()
            }
        };

        info!("Loaded {} stored translations", loaded.len());
        *self.write_entries() = loaded.clone();
        loaded
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.read_entries().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Record a translation in memory and merge it into the persisted
    /// mapping (read current blob, set one key, write the blob back).
    ///
    /// The read-modify-write is not locked: two caches sharing a store that
    /// write at the same moment can lose one of the two keys on disk.
    /// Persistence failures are logged; the in-memory entry is kept.
    pub async fn put(&self, id: &str, text: &str) {
        self.write_entries()
            .insert(id.to_string(), text.to_string());

        if let Err(e) = self.merge_persisted(id, text).await {
            warn!("Error saving translation for {}: {:#}", id, e);
        }
    }

    /// Drop every entry, in memory and on disk.
    pub async fn clear(&self) -> Result<()> {
        self.write_entries().clear();
        self.store
            .remove_item(&self.key)
            .await
            .context("Failed to remove stored translations")?;
        info!("Cleared stored translations");
        Ok(())
    }

    async fn read_persisted(&self) -> Result<Option<HashMap<String, String>>> {
        let Some(raw) = self
            .store
            .get_item(&self.key)
            .await
            .context("Failed to read stored translations")?
        else {
            return Ok(None);
        };
        let map = serde_json::from_str(&raw).context("Stored translations are not valid JSON")?;
        Ok(Some(map))
    }

    async fn merge_persisted(&self, id: &str, text: &str) -> Result<()> {
        let mut persisted = self.read_persisted().await?.unwrap_or_default();
        persisted.insert(id.to_string(), text.to_string());
        let raw = serde_json::to_string(&persisted).context("Failed to serialize translations")?;
        self.store
            .set_item(&self.key, &raw)
            .await
            .context("Failed to write stored translations")?;
        debug!("Persisted translation for {} ({} total)", id, persisted.len());
        Ok(())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
