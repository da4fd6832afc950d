use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory store not found: {name}")]
    StoreNotFound { name: String },

    #[error("Memory item not found: {id}")]
    ItemNotFound { id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<MemoryError> for colloquy_core::EngineError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::StoreNotFound { name } => colloquy_core::EngineError::NotFound {
                entity: "memory_store",
                id: name,
            },
            MemoryError::ItemNotFound { id } => colloquy_core::EngineError::NotFound {
                entity: "memory_item",
                id,
            },
            MemoryError::InvalidArgument(m) => colloquy_core::EngineError::InvalidArgument(m),
            MemoryError::Io(e) => colloquy_core::EngineError::Io(e),
            MemoryError::Serialization(e) => colloquy_core::EngineError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
