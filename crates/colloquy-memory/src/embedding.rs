use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use colloquy_core::provider::EmbeddingProvider;
use colloquy_core::types::TagBag;

use crate::error::{MemoryError, Result};
use crate::store::{evict_min_importance, substring_search, MemoryStore};
use crate::types::{MemoryItem, SearchHit};

/// Long-term store that attaches an embedding to each item on add and ranks
/// search results by cosine similarity.
///
/// Embedding failures degrade gracefully: the item is stored without a
/// vector and substring search covers it from then on.
pub struct EmbeddingStore {
    items: Mutex<HashMap<String, MemoryItem>>,
    capacity: Option<usize>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl EmbeddingStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, capacity: Option<usize>) -> Self {
        let dimension = embedder.dimension();
        Self {
            items: Mutex::new(HashMap::new()),
            capacity: capacity.map(|c| c.max(1)),
            embedder,
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl MemoryStore for EmbeddingStore {
    async fn add(&self, payload: serde_json::Value, tags: TagBag) -> Result<String> {
        let mut item = MemoryItem::new(payload, tags);
        match self.embedder.embed(&item.coerce_text()).await {
            Ok(vec) if vec.len() == self.dimension => item.embedding = Some(vec),
            Ok(vec) => {
                warn!(
                    got = vec.len(),
                    want = self.dimension,
                    "embedding dimension mismatch, storing without vector"
                );
            }
            Err(e) => {
                warn!(error = %e, "embedding failed, storing without vector");
            }
        }

        let mut items = self.items.lock().unwrap();
        if let Some(cap) = self.capacity {
            while items.len() >= cap {
                evict_min_importance(&mut items);
            }
        }
        let id = item.id.clone();
        items.insert(id.clone(), item);
        Ok(id)
    }

    fn get(&self, id: &str) -> Option<MemoryItem> {
        let mut items = self.items.lock().unwrap();
        let item = items.get_mut(id)?;
        item.touch();
        Some(item.clone())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vec = match self.embedder.embed(query).await {
            Ok(v) if v.len() == self.dimension => Some(v),
            Ok(_) | Err(_) => None,
        };

        let mut items = self.items.lock().unwrap();
        let Some(query_vec) = query_vec else {
            // Whole-query fallback when the embedder is down.
            return Ok(substring_search(&mut items, query, limit, false));
        };

        // Rank vectored items by cosine, ties broken by recency.
        let mut scored: Vec<(String, f64)> = items
            .values()
            .filter_map(|i| {
                i.embedding
                    .as_ref()
                    .map(|v| (i.id.clone(), cosine_similarity(&query_vec, v)))
            })
            .collect();
        scored.sort_by(|(a_id, a_sim), (b_id, b_sim)| {
            b_sim.total_cmp(a_sim).then_with(|| {
                items[b_id]
                    .last_accessed
                    .cmp(&items[a_id].last_accessed)
            })
        });
        scored.truncate(limit);

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .map(|(id, similarity)| {
                let item = items.get_mut(&id).unwrap();
                item.touch();
                SearchHit {
                    item: item.clone(),
                    similarity,
                }
            })
            .collect();

        // Vectorless items are only reachable by substring for this query.
        if hits.len() < limit {
            let extra = substring_search(&mut items, query, limit - hits.len(), true);
            hits.extend(extra);
        }
        Ok(hits)
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
        for item in &items {
            if let Some(v) = &item.embedding {
                if v.len() != self.dimension {
                    return Err(MemoryError::InvalidArgument(format!(
                        "item {} has embedding dimension {}, store expects {}",
                        item.id,
                        v.len(),
                        self.dimension
                    )));
                }
            }
        }
        let mut map = self.items.lock().unwrap();
        map.clear();
        for item in items {
            map.insert(item.id.clone(), item);
        }
        Ok(())
    }
}

/// Cosine similarity of two vectors, accumulated in f64. Returns 0.0 for
/// mismatched lengths or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
