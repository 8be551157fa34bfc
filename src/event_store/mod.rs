//! Event Store Module
//!
//! This module provides the durable half of the stream:
//! - `EventStore`: append-only log with per-write advisory locking
//! - `OffsetTracker`: global, strictly increasing offset counter
//! - `LogRotation`: archives the active log when it grows too large
//! - `LogReader`: sequential scan over every segment
//! - `StatsCollector`: storage statistics
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ append  │───►│ validate + │───►│ flock, write │───►│ size > max?     │
//! │ NewEvent│    │ assign ids │    │ one line     │    │ archive segment │
//! └─────────┘    └────────────┘    └──────────────┘    └─────────────────┘
//!
//! Read Path (Recovery):
//! ┌──────────────────────┐    ┌───────────────────┐
//! │ archive/*_a_to_b     │───►│ active stream log │───► LogRecord stream
//! │ (sorted by offset)   │    │                   │
//! └──────────────────────┘    └───────────────────┘
//! ```

mod offset;
mod reader;
mod rotation;
mod stats;
mod store;

pub use offset::OffsetTracker;
pub use reader::{CorruptLine, LogReader, LogRecord};
pub use rotation::{ArchiveInfo, LogRotation};
pub use stats::{StatsCollector, StreamStats};
pub use store::EventStore;
