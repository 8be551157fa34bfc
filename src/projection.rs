//! Read models derived from the log
//!
//! A projection is folded over events both live (after each append) and
//! during recovery, so the state it ends up with depends only on the log.

use crate::types::StreamEvent;

/// A materialized view maintained from stream events
///
/// `apply` sees every event in offset order. It must tolerate events it does
/// not care about and payloads it cannot decode; those are skipped.
pub trait Projection: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fold one event into the view
    fn apply(&self, event: &StreamEvent);

    /// Drop all state before a full replay
    fn reset(&self);
}
