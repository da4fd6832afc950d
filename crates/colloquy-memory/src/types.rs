use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use colloquy_core::types::TagBag;

/// A single long-term memory item. The payload is opaque to the store beyond
/// the text coercion used for substring search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub tags: TagBag,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Non-decreasing read counter; feeds the importance score.
    pub access_count: u64,
    /// Fixed dimension per store instance when present.
    pub embedding: Option<Vec<f32>>,
}

impl MemoryItem {
    pub fn new(payload: serde_json::Value, tags: TagBag) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            payload,
            tags,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            embedding: None,
        }
    }

    /// Text form of the payload used for substring matching and embedding.
    pub fn coerce_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// One search result, annotated with its similarity. Substring matches carry
/// a similarity of 0.0; cosine matches fall in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub similarity: f64,
}
