use std::time::Duration;

use thiserror::Error;

/// Engine-wide error taxonomy. Every component maps its failures onto one of
/// these kinds before they cross a component boundary, so callers can decide
/// per-kind whether to continue, retry, or abort.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Incompatible version for tool '{tool}': requested {requested}{}",
        .closest.as_ref().map(|c| format!(" (closest: {c})")).unwrap_or_default())]
    IncompatibleVersion {
        tool: String,
        requested: String,
        /// The nearest registered version, offered back to the caller.
        closest: Option<String>,
    },

    #[error("Temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short error code string surfaced in reply metadata.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EngineError::IncompatibleVersion { .. } => "INCOMPATIBLE_VERSION",
            EngineError::Unavailable(_) => "UNAVAILABLE",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::Cancelled => "CANCELLED",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Only transient outages and deadline misses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Unavailable(_) | EngineError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Base delay for the exponential backoff ladder.
const RETRY_BASE_DELAY_MS: u64 = 200;

/// Run `op` up to `1 + attempts` times, sleeping `200ms * 2^n` between tries.
/// Only retryable kinds re-enter the loop; everything else returns at once.
pub async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut tries_left = attempts;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && tries_left > 0 => {
                tracing::warn!(error = %e, tries_left, "retryable failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                tries_left -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}
