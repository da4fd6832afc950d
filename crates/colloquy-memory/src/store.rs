use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use colloquy_core::types::TagBag;

use crate::error::{MemoryError, Result};
use crate::types::{MemoryItem, SearchHit};

/// Weight on the access counter in the importance score.
const IMPORTANCE_ACCESS_WEIGHT: f64 = 0.7;
/// Weight on recency in the importance score.
const IMPORTANCE_RECENCY_WEIGHT: f64 = 0.3;

/// Capability set shared by all long-term stores.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a payload, returning the new item id.
    async fn add(&self, payload: serde_json::Value, tags: TagBag) -> Result<String>;

    /// Fetch by id, bumping the access counter.
    fn get(&self, id: &str) -> Option<MemoryItem>;

    /// Top-`limit` items for a natural-language query, each annotated with
    /// its similarity.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every item, for persistence.
    fn snapshot(&self) -> Vec<MemoryItem>;

    /// Replace contents with a persisted snapshot.
    fn restore(&self, items: Vec<MemoryItem>) -> Result<()>;
}

/// Importance = 0.7 · access_count + 0.3 · recency, where recency decays as
/// 1 / (age_in_seconds + 1). Eviction removes the minimum-scoring item,
/// breaking ties in favour of the more recently created one.
pub(crate) fn importance(item: &MemoryItem, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let age_secs = (now - item.created_at).num_seconds().max(0) as f64;
    let recency = 1.0 / (age_secs + 1.0);
    IMPORTANCE_ACCESS_WEIGHT * item.access_count as f64 + IMPORTANCE_RECENCY_WEIGHT * recency
}

pub(crate) fn evict_min_importance(items: &mut HashMap<String, MemoryItem>) {
    let now = Utc::now();
    let victim = items
        .values()
        .min_by(|a, b| {
            importance(a, now)
                .total_cmp(&importance(b, now))
                .then(a.created_at.cmp(&b.created_at))
        })
        .map(|i| i.id.clone());
    if let Some(id) = victim {
        items.remove(&id);
        debug!(item = %id, "evicted least-important memory item");
    }
}

/// Case-insensitive substring matches ordered by last access, newest first.
pub(crate) fn substring_search(
    items: &mut HashMap<String, MemoryItem>,
    query: &str,
    limit: usize,
    only_vectorless: bool,
) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    let mut matched: Vec<String> = items
        .values()
        .filter(|i| !only_vectorless || i.embedding.is_none())
        .filter(|i| i.coerce_text().to_lowercase().contains(&needle))
        .map(|i| i.id.clone())
        .collect();
    matched.sort_by(|a, b| {
        let la = items[a].last_accessed;
        let lb = items[b].last_accessed;
        lb.cmp(&la)
    });
    matched.truncate(limit);
    matched
        .into_iter()
        .map(|id| {
            let item = items.get_mut(&id).unwrap();
            item.touch();
            SearchHit {
                item: item.clone(),
                similarity: 0.0,
            }
        })
        .collect()
}

/// Plain in-memory store, bounded or unbounded.
pub struct InMemoryStore {
    items: Mutex<HashMap<String, MemoryItem>>,
    capacity: Option<usize>,
}

impl InMemoryStore {
    /// Unbounded variant that grows until cleared.
    pub fn unbounded() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Bounded variant with importance-score eviction.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub(crate) fn insert_item(&self, item: MemoryItem) -> String {
        let mut items = self.items.lock().unwrap();
        if let Some(cap) = self.capacity {
            while items.len() >= cap {
                evict_min_importance(&mut items);
            }
        }
        let id = item.id.clone();
        items.insert(id.clone(), item);
        id
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, payload: serde_json::Value, tags: TagBag) -> Result<String> {
        Ok(self.insert_item(MemoryItem::new(payload, tags)))
    }

    fn get(&self, id: &str) -> Option<MemoryItem> {
        let mut items = self.items.lock().unwrap();
        let item = items.get_mut(id)?;
        item.touch();
        Some(item.clone())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut items = self.items.lock().unwrap();
        Ok(substring_search(&mut items, query, limit, false))
    }

    fn clear(&self) {
        self.items.lock().unwrap().clear();
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<MemoryItem> {
        let mut all: Vec<MemoryItem> = self.items.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn restore(&self, items: Vec<MemoryItem>) -> Result<()> {
        let mut map = self.items.lock().unwrap();
        map.clear();
        for item in items {
            map.insert(item.id.clone(), item);
        }
        Ok(())
    }
}

/// Serialize a store's items to a byte stream. Round-trip load yields an
/// equal-by-id item set.
pub fn save_to_bytes(store: &dyn MemoryStore) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&store.snapshot())?)
}

pub fn load_from_bytes(store: &dyn MemoryStore, bytes: &[u8]) -> Result<()> {
    let items: Vec<MemoryItem> = serde_json::from_slice(bytes)?;
    store.restore(items)
}

/// Write-all-or-nothing save: write to a temp file in the target directory,
/// then rename over the destination.
pub fn save_to_path(store: &dyn MemoryStore, path: &Path) -> Result<()> {
    let bytes = save_to_bytes(store)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| MemoryError::Io(e.error))?;
    Ok(())
}

pub fn load_from_path(store: &dyn MemoryStore, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    load_from_bytes(store, &bytes)
}
