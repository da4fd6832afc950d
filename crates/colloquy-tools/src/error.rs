use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool '{name}' already registered at version {version}")]
    AlreadyRegistered { name: String, version: String },

    #[error("No compatible version of '{tool}' for request {requested}{}",
        .closest.as_ref().map(|c| format!(" (closest: {c})")).unwrap_or_default())]
    IncompatibleVersion {
        tool: String,
        requested: String,
        closest: Option<String>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tool timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Tool cancelled")]
    Cancelled,

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ToolError> for colloquy_core::EngineError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound { name } => colloquy_core::EngineError::NotFound {
                entity: "tool",
                id: name,
            },
            ToolError::AlreadyRegistered { name, version } => {
                colloquy_core::EngineError::InvalidArgument(format!(
                    "tool '{name}' already registered at version {version}"
                ))
            }
            ToolError::IncompatibleVersion {
                tool,
                requested,
                closest,
            } => colloquy_core::EngineError::IncompatibleVersion {
                tool,
                requested,
                closest,
            },
            ToolError::InvalidArgument(m) => colloquy_core::EngineError::InvalidArgument(m),
            ToolError::Timeout { ms } => colloquy_core::EngineError::Timeout { ms },
            ToolError::Cancelled => colloquy_core::EngineError::Cancelled,
            ToolError::Execution(m) => colloquy_core::EngineError::Internal(m),
            ToolError::Io(e) => colloquy_core::EngineError::Io(e),
            ToolError::Serialization(e) => colloquy_core::EngineError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
