use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelationshipError {
    #[error("Relationship not found: {id}")]
    NotFound { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RelationshipError> for colloquy_core::EngineError {
    fn from(e: RelationshipError) -> Self {
        match e {
            RelationshipError::NotFound { id } => colloquy_core::EngineError::NotFound {
                entity: "relationship",
                id,
            },
            RelationshipError::TaskNotFound { id } => colloquy_core::EngineError::NotFound {
                entity: "relationship_task",
                id,
            },
            RelationshipError::InvalidArgument(m) => {
                colloquy_core::EngineError::InvalidArgument(m)
            }
            RelationshipError::Io(e) => colloquy_core::EngineError::Io(e),
            RelationshipError::Serialization(e) => colloquy_core::EngineError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelationshipError>;
