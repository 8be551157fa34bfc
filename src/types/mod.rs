//! Data types for the event stream
//!
//! This module contains all the core data structures used throughout the crate.

mod checkpoint;
mod context;
mod event;

pub use checkpoint::{
    validate_options, Checkpoint, CheckpointOption, CheckpointOutcome, CheckpointStatus,
};
pub use context::{ContextSnapshot, LedgerState, MemoryEntry};
pub use event::{
    AgentCompletedPayload, AgentFailedPayload, AgentHandoffPayload, AgentSpawnedPayload,
    CheckpointRequestedPayload, CheckpointResolvedPayload, ContextSnapshotPayload, EventMetadata,
    EventPayload, EventType, LearningPayload, NewEvent, SessionPayload, StreamEvent,
    TaskProgressPayload, TaskStatus,
};
