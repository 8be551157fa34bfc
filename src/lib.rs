//! Durable Event Stream
//!
//! A local, crash-recoverable, append-only event log used as the single
//! source of truth for multi-agent coordination.
//!
//! # Features
//!
//! - **Total Ordering**: every event gets a global, strictly increasing offset
//! - **Durable Appends**: one JSON line per event, written under an advisory lock
//! - **Rotation**: size-based archiving that never resets offsets
//! - **Ordered Subscriptions**: listeners complete, in registration order, before `append` returns
//! - **Human-in-the-Loop**: checkpoint approval gates with expiry
//! - **Context Snapshots**: latest resumable agent state per session
//! - **Replay Recovery**: all in-memory state rebuilt from the log on startup
//!
//! # Modules
//!
//! - `types`: Core data structures (StreamEvent, Checkpoint, ContextSnapshot)
//! - `event_store`: Durable log, offsets, rotation, reader, statistics
//! - `bus`: Subscription bus
//! - `stream`: The ordered append primitive
//! - `projection`: Read-model trait shared by live appends and recovery
//! - `checkpoint`: Checkpoint manager
//! - `context`: Context snapshot manager
//! - `recovery`: Log replay
//! - `orchestrator`: Facade and typed builders
//! - `config`, `error`, `utils`
//!
//! # Example
//!
//! ```no_run
//! use event_stream::{CheckpointOption, Orchestrator, StreamConfig, StreamResult};
//!
//! #[tokio::main]
//! async fn main() -> StreamResult<()> {
//!     let orchestrator = Orchestrator::open(StreamConfig::new("data/stream.jsonl")).await?;
//!
//!     orchestrator.spawn_agent("s1", "coder", "fix the login bug", None).await?;
//!     let checkpoint = orchestrator
//!         .request_checkpoint(
//!             "s1",
//!             "Merge the fix?",
//!             vec![CheckpointOption::new("merge", "Merge")],
//!             "coder",
//!         )
//!         .await?;
//!     orchestrator
//!         .approve_checkpoint(&checkpoint.id, "alice", Some("merge"))
//!         .await?;
//!
//!     orchestrator.shutdown();
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod event_store;
pub mod history;
pub mod orchestrator;
pub mod projection;
pub mod recovery;
pub mod stream;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use bus::{EventFilter, ListenerError, ListenerResult, Subscription, SubscriptionBus};
pub use checkpoint::CheckpointManager;
pub use config::StreamConfig;
pub use context::ContextSnapshotManager;
pub use error::{StreamError, StreamResult};
pub use event_store::{EventStore, StreamStats};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryReport;
pub use types::{
    Checkpoint, CheckpointOption, CheckpointOutcome, CheckpointStatus, ContextSnapshot,
    ContextSnapshotPayload, EventPayload, EventType, LedgerState, MemoryEntry, NewEvent,
    StreamEvent, TaskStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
