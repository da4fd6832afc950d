//! Context processing and injection: normalizes side-channel facts by kind
//! and renders them into a prompt prefix, with an explicit continuity rule
//! for short "keep going" user turns.

pub mod continuity;
pub mod handlers;
pub mod injector;
pub mod processor;
pub mod types;

pub use injector::ContextInjector;
pub use processor::ContextProcessor;
pub use types::{ContextKind, ProcessedContext};
