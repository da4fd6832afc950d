//! Interfaces to the external model and embedding providers.
//!
//! The engine never talks to a concrete LLM or embedding API itself; it
//! consumes these two traits. They live in the leaf crate so every component
//! can depend on them without cycles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role of a message in the prompt sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single message in the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
        }
    }
}

/// Generation parameters forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub stop: Option<Vec<String>>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            model_name: "default".to_string(),
            temperature: 0.7,
            max_output_tokens: 4096,
            stop: None,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A finished (non-streaming) completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Provider failures are either transient (worth a bounded retry) or fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("request cancelled")]
    Cancelled,

    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::Timeout { .. }
        )
    }
}

impl From<ProviderError> for crate::EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(m) => crate::EngineError::Unavailable(m),
            ProviderError::Timeout { ms } => crate::EngineError::Timeout { ms },
            ProviderError::Cancelled => crate::EngineError::Cancelled,
            ProviderError::Fatal(m) => crate::EngineError::Internal(m),
        }
    }
}

/// Common interface for language-model backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Produce a completion for an ordered message list. Implementations
    /// must honour `cancel`, returning [`ProviderError::Cancelled`]
    /// promptly once the token fires.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &GenerateConfig,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError>;
}

/// Embedding failures. `Unavailable` is the explicit "no embedding for you"
/// outcome; callers fall back to non-vector search.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding failure: {0}")]
    Fatal(String),
}

/// Common interface for embedding backends. Vectors have a fixed dimension
/// per provider instance.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}
