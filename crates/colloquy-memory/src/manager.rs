use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use colloquy_core::types::TagBag;

use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;
use crate::types::SearchHit;

/// Registry of named long-term stores with one designated default.
///
/// Constructed once at bootstrap and passed by reference; there is no
/// global instance.
pub struct MemoryManager {
    stores: RwLock<HashMap<String, Arc<dyn MemoryStore>>>,
    default_store: RwLock<Option<String>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            default_store: RwLock::new(None),
        }
    }

    /// Register a store under a logical name. The first registration becomes
    /// the default unless a later one claims it.
    pub fn register(&self, name: impl Into<String>, store: Arc<dyn MemoryStore>, default: bool) {
        let name = name.into();
        let mut stores = self.stores.write().unwrap();
        stores.insert(name.clone(), store);
        let mut def = self.default_store.write().unwrap();
        if default || def.is_none() {
            *def = Some(name.clone());
        }
        info!(store = %name, "memory store registered");
    }

    pub fn store(&self, name: &str) -> Result<Arc<dyn MemoryStore>> {
        self.stores
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| MemoryError::StoreNotFound {
                name: name.to_string(),
            })
    }

    pub fn default_store(&self) -> Result<Arc<dyn MemoryStore>> {
        let name = self
            .default_store
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| MemoryError::StoreNotFound {
                name: "<default>".to_string(),
            })?;
        self.store(&name)
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.read().unwrap().keys().cloned().collect()
    }

    /// Add to a named store, or the default when `name` is `None`.
    pub async fn add(
        &self,
        name: Option<&str>,
        payload: serde_json::Value,
        tags: TagBag,
    ) -> Result<String> {
        let store = match name {
            Some(n) => self.store(n)?,
            None => self.default_store()?,
        };
        store.add(payload, tags).await
    }

    /// Search a named store, or the default when `name` is `None`.
    pub async fn search(
        &self,
        name: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let store = match name {
            Some(n) => self.store(n)?,
            None => self.default_store()?,
        };
        store.search(query, limit).await
    }

    /// Fan a query across every registered store, returning per-store result
    /// buckets.
    pub async fn search_all(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<HashMap<String, Vec<SearchHit>>> {
        let stores: Vec<(String, Arc<dyn MemoryStore>)> = {
            let guard = self.stores.read().unwrap();
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut buckets = HashMap::with_capacity(stores.len());
        for (name, store) in stores {
            let hits = store.search(query, limit).await?;
            debug!(store = %name, hits = hits.len(), "fan-out search bucket");
            buckets.insert(name, hits);
        }
        Ok(buckets)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn unknown_store_is_not_found() {
        let mgr = MemoryManager::new();
        let err = mgr.search(Some("nope"), "x", 5).await;
        assert!(matches!(err, Err(MemoryError::StoreNotFound { .. })));
    }

    #[tokio::test]
    async fn first_registration_becomes_default() {
        let mgr = MemoryManager::new();
        mgr.register("working", Arc::new(InMemoryStore::unbounded()), false);
        mgr.register("archive", Arc::new(InMemoryStore::unbounded()), false);
        mgr.add(None, serde_json::json!("note"), TagBag::new())
            .await
            .unwrap();
        assert_eq!(mgr.store("working").unwrap().len(), 1);
        assert_eq!(mgr.store("archive").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn search_all_returns_per_store_buckets() {
        let mgr = MemoryManager::new();
        mgr.register("a", Arc::new(InMemoryStore::unbounded()), true);
        mgr.register("b", Arc::new(InMemoryStore::unbounded()), false);
        mgr.add(Some("a"), serde_json::json!("shared topic one"), TagBag::new())
            .await
            .unwrap();
        mgr.add(Some("b"), serde_json::json!("shared topic two"), TagBag::new())
            .await
            .unwrap();

        let buckets = mgr.search_all("shared", 5).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets["a"].len(), 1);
        assert_eq!(buckets["b"].len(), 1);
    }
}
