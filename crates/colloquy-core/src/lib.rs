//! Shared foundation for the Colloquy dialogue orchestration engine:
//! entity types, the engine-wide error taxonomy, configuration loading,
//! and the narrow interfaces to external model/embedding providers.

pub mod config;
pub mod error;
pub mod provider;
pub mod types;

pub use error::{EngineError, Result};
