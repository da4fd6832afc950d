//! Relationship engine: longitudinal per-pair interaction state, a derived
//! intensity score that shapes prompts, and background tasks generated from
//! relationship templates.

pub mod engine;
pub mod error;
pub mod persist;
pub mod scheduler;
pub mod tasks;
pub mod types;

pub use engine::{InteractionUpdate, RelationshipEngine, UpdateOutcome};
pub use error::{RelationshipError, Result};
pub use scheduler::{TaskHandler, TaskScheduler};
pub use tasks::{RelationshipTask, TaskManager, TaskStatus};
pub use types::{
    CollaborationCounts, IntensitySnapshot, RelationshipLevel, RelationshipRecord,
    RelationshipStage, RelationshipStatus,
};
