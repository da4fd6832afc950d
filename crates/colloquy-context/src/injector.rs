use tracing::debug;

use colloquy_core::config::{ContextConfig, ContextPriority, InjectionPosition};
use colloquy_core::provider::{ChatMessage, ChatRole};

/// At low priority, injection only happens while the conversation is still
/// short.
const LOW_PRIORITY_HISTORY_THRESHOLD: usize = 6;

/// Places a rendered context block into a prompt, a message list, or a
/// history list, honouring the configured position, priority, and size cap.
pub struct ContextInjector {
    config: ContextConfig,
}

impl ContextInjector {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn position(&self) -> InjectionPosition {
        self.config.context_injection_position
    }

    pub fn priority(&self) -> ContextPriority {
        self.config.context_priority
    }

    /// Whether injection should happen at all for a conversation of
    /// `history_len` messages.
    pub fn should_inject(&self, history_len: usize) -> bool {
        if !self.config.enable_context_injection {
            return false;
        }
        match self.config.context_priority {
            ContextPriority::Low => history_len < LOW_PRIORITY_HISTORY_THRESHOLD,
            ContextPriority::Medium | ContextPriority::High => true,
        }
    }

    /// Cap the block by the configured length (character proxy for tokens).
    pub fn capped_block(&self, block: &str) -> String {
        let block = block.trim_end();
        if block.chars().count() <= self.config.max_context_tokens {
            return block.to_string();
        }
        let truncated: String = block.chars().take(self.config.max_context_tokens).collect();
        debug!(
            cap = self.config.max_context_tokens,
            "context block truncated"
        );
        truncated
    }

    /// `prefix` mode: concatenate ahead of a plain prompt string.
    pub fn inject_to_prompt(&self, prompt: &str, block: &str, history_len: usize) -> String {
        if !self.should_inject(history_len) || block.trim().is_empty() {
            return prompt.to_string();
        }
        format!("{}\n\n{prompt}", self.capped_block(block))
    }

    /// `system` mode: merge into the first system message, or create one at
    /// the head of the list.
    pub fn inject_to_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        block: &str,
        history_len: usize,
    ) -> Vec<ChatMessage> {
        if !self.should_inject(history_len) || block.trim().is_empty() {
            return messages;
        }
        let block = self.capped_block(block);
        match messages.iter_mut().find(|m| m.role == ChatRole::System) {
            Some(system) => {
                // High priority leads the system prompt; otherwise it trails.
                system.content = if self.config.context_priority == ContextPriority::High {
                    format!("{block}\n\n{}", system.content)
                } else {
                    format!("{}\n\n{block}", system.content)
                };
            }
            None => messages.insert(0, ChatMessage::system(block)),
        }
        messages
    }

    /// `inline` mode: prepend a fresh system message to a history list.
    pub fn inject_to_history(&self, history: Vec<ChatMessage>, block: &str) -> Vec<ChatMessage> {
        if !self.should_inject(history.len()) || block.trim().is_empty() {
            return history;
        }
        let mut out = Vec::with_capacity(history.len() + 1);
        out.push(ChatMessage::system(self.capped_block(block)));
        out.extend(history);
        out
    }
}
