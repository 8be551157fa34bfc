//! Crash Recovery by Full Log Replay
//!
//! On startup the in-memory state (projections, recent history, offset
//! counter) is discarded and rebuilt by folding every persisted record over
//! the registered projections.
//!
//! ## Recovery Sequence
//!
//! 1. Reset every projection and the history window
//! 2. Scan archived segments oldest first, then the active log
//! 3. Apply each decodable event; log and skip each corrupt line
//! 4. Set the offset counter to `max(valid events, highest offset seen)`
//!
//! ## Key Principle
//!
//! Running recovery twice over the same log yields the same state. Nothing
//! is ever written back to the log.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StreamResult;
use crate::event_store::{EventStore, LogRecord};
use crate::history::EventHistory;
use crate::projection::Projection;

/// What a replay found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Valid events folded into the projections
    pub events_replayed: u64,
    /// Lines that failed to decode and were skipped
    pub corrupt_lines_skipped: u64,
    /// The very last record of the log was unreadable (crash mid-write)
    pub truncated_tail: bool,
    /// Events whose offset did not exceed an earlier one
    pub out_of_order_offsets: u64,
    /// Archived segments plus the active log
    pub segments_scanned: usize,
    /// Offset the counter resumes from
    pub current_offset: u64,
    /// Checkpoints still awaiting a decision after replay
    pub pending_checkpoints: usize,
    /// Sessions with at least one restorable snapshot
    pub sessions_with_snapshots: usize,
    /// Wall-clock replay time (microseconds)
    pub recovery_time_micros: u64,
}

impl RecoveryReport {
    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Recovery complete: {} events from {} segments, {} corrupt{}, offset {}, {} pending checkpoints, {} sessions with snapshots, {:.2}ms",
            self.events_replayed,
            self.segments_scanned,
            self.corrupt_lines_skipped,
            if self.truncated_tail { " (torn tail)" } else { "" },
            self.current_offset,
            self.pending_checkpoints,
            self.sessions_with_snapshots,
            self.recovery_time_micros as f64 / 1000.0,
        )
    }

    /// Check if recovery had any issues (corruption, offset anomalies)
    pub fn has_issues(&self) -> bool {
        self.corrupt_lines_skipped > 0 || self.out_of_order_offsets > 0
    }
}

/// Folds the persisted log over a set of projections
pub struct RecoveryEngine<'a> {
    store: &'a EventStore,
    projections: &'a [Arc<dyn Projection>],
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(store: &'a EventStore, projections: &'a [Arc<dyn Projection>]) -> Self {
        Self { store, projections }
    }

    /// Replay the whole log, seeding `history` with the newest events
    ///
    /// Only I/O failures abort recovery; undecodable lines are skipped.
    pub fn run(&self, history: &mut EventHistory) -> StreamResult<RecoveryReport> {
        let started = Instant::now();
        let mut report = RecoveryReport::default();

        for projection in self.projections {
            projection.reset();
        }
        history.clear();

        report.segments_scanned = self.store.rotation().list_archives()?.len() + 1;

        let mut max_offset = 0u64;
        for record in self.store.read_all()? {
            match record? {
                LogRecord::Event(event) => {
                    let offset = event.offset();
                    if offset <= max_offset {
                        report.out_of_order_offsets += 1;
                        warn!(
                            offset,
                            previous = max_offset,
                            event_id = %event.id,
                            "event offset does not increase"
                        );
                    }
                    max_offset = max_offset.max(offset);

                    for projection in self.projections {
                        projection.apply(&event);
                    }
                    history.push(event);
                    report.events_replayed += 1;
                }
                LogRecord::Corrupt(corrupt) => {
                    report.corrupt_lines_skipped += 1;
                    if corrupt.trailing {
                        report.truncated_tail = true;
                    }
                    warn!(
                        segment = %corrupt.segment.display(),
                        line = corrupt.line,
                        trailing = corrupt.trailing,
                        error = %corrupt.error,
                        "skipping corrupt log record"
                    );
                }
            }
        }

        report.current_offset = report.events_replayed.max(max_offset);
        self.store.restore_offset(report.current_offset);
        report.recovery_time_micros = started.elapsed().as_micros() as u64;

        for projection in self.projections {
            debug!(projection = projection.name(), "projection rebuilt");
        }
        if report.has_issues() {
            warn!(
                corrupt = report.corrupt_lines_skipped,
                out_of_order = report.out_of_order_offsets,
                "recovery found damaged records"
            );
        }
        info!(
            events = report.events_replayed,
            offset = report.current_offset,
            segments = report.segments_scanned,
            "log replayed"
        );

        Ok(report)
    }
}
