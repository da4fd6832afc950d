use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid turn transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for colloquy_core::EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => {
                colloquy_core::EngineError::NotFound { entity, id }
            }
            StoreError::InvalidTransition { from, to } => colloquy_core::EngineError::Internal(
                format!("invalid turn transition: {from} -> {to}"),
            ),
            StoreError::Serialization(e) => colloquy_core::EngineError::Serialization(e),
            StoreError::Database(e) => colloquy_core::EngineError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
