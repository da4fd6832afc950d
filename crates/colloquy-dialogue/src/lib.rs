//! The dialogue manager: per-utterance control flow, the session/turn state
//! machine, and the glue between memory, context, tools, the relationship
//! engine, and the model provider.

pub mod kinds;
pub mod manager;

pub use kinds::{detect_kind, KindPolicy};
pub use manager::{DialogueManager, ProcessReply, ProcessRequest, ToolCallSummary};
