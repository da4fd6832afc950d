use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use colloquy_core::provider::ChatRole;

/// One message held in the short-term buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct Conversation {
    messages: Vec<BufferedMessage>,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl Conversation {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Drop oldest non-system messages until at most `max_rounds * 2` remain.
    /// System-role messages always survive.
    fn trim_to_rounds(&mut self, max_rounds: usize) {
        let keep = max_rounds * 2;
        let non_system: Vec<BufferedMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .cloned()
            .collect();
        if non_system.len() <= keep {
            return;
        }
        let system: Vec<BufferedMessage> = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .cloned()
            .collect();
        let recent = non_system[non_system.len() - keep..].to_vec();
        self.messages = system.into_iter().chain(recent).collect();
        self.last_updated = Utc::now();
    }
}

/// Short-term ordered conversation memory.
///
/// Holds at most `max_conversations` concurrent conversations with LRU
/// eviction by last-updated timestamp. Append and trim against the same
/// conversation serialize on the map's shard lock.
pub struct ConversationBuffer {
    conversations: DashMap<String, Conversation>,
    max_conversations: usize,
    max_rounds: usize,
}

impl ConversationBuffer {
    pub fn new(max_conversations: usize, max_rounds: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            max_conversations: max_conversations.max(1),
            max_rounds: max_rounds.max(1),
        }
    }

    /// Append a message, creating the conversation on first use. Enforces the
    /// per-conversation round bound and the global LRU capacity.
    pub fn append(&self, conversation_id: &str, role: ChatRole, content: impl Into<String>) {
        {
            let mut entry = self
                .conversations
                .entry(conversation_id.to_string())
                .or_insert_with(Conversation::new);
            entry.messages.push(BufferedMessage {
                role,
                content: content.into(),
                at: Utc::now(),
            });
            entry.last_updated = Utc::now();
            entry.trim_to_rounds(self.max_rounds);
        }
        self.evict_lru(conversation_id);
    }

    /// Full ordered read of one conversation.
    pub fn messages(&self, conversation_id: &str) -> Vec<BufferedMessage> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// The last `count` messages, optionally skipping system-role entries.
    pub fn recent(
        &self,
        conversation_id: &str,
        count: usize,
        include_system: bool,
    ) -> Vec<BufferedMessage> {
        let Some(conv) = self.conversations.get(conversation_id) else {
            return Vec::new();
        };
        let filtered: Vec<&BufferedMessage> = conv
            .messages
            .iter()
            .filter(|m| include_system || m.role != ChatRole::System)
            .collect();
        let start = filtered.len().saturating_sub(count);
        filtered[start..].iter().map(|m| (*m).clone()).collect()
    }

    /// Clear one conversation's messages, keeping system-role entries.
    pub fn clear(&self, conversation_id: &str) {
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.messages.retain(|m| m.role == ChatRole::System);
            conv.last_updated = Utc::now();
        }
    }

    /// Explicit trim entry point (the append path also enforces the bound).
    pub fn trim(&self, conversation_id: &str, max_rounds: usize) {
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.trim_to_rounds(max_rounds);
        }
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Evict least-recently-updated conversations until we're back under the
    /// cap. `protected` (the conversation just written) is never the victim.
    fn evict_lru(&self, protected: &str) {
        while self.conversations.len() > self.max_conversations {
            let victim = self
                .conversations
                .iter()
                .filter(|e| e.key() != protected)
                .min_by_key(|e| (e.value().last_updated, e.value().created_at))
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    self.conversations.remove(&key);
                    debug!(conversation = %key, "evicted LRU conversation");
                }
                None => break,
            }
        }
    }
}
