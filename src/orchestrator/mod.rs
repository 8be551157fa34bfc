//! Orchestrator Facade
//!
//! The single entry point for callers. An [`Orchestrator`] is an explicit,
//! long-lived instance: construct it once with [`Orchestrator::open`], share
//! it (e.g. behind an `Arc`), and tear it down with
//! [`Orchestrator::shutdown`].
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::open(StreamConfig::new("data/stream.jsonl")).await?;
//! orchestrator.start_session("s1", Default::default()).await?;
//! orchestrator.spawn_agent("s1", "coder", "fix the bug", None).await?;
//! let recent = orchestrator.event_history(None, Some(10));
//! ```

mod builders;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bus::{EventFilter, ListenerResult, Subscription};
use crate::checkpoint::{CheckpointManager, CheckpointProjection};
use crate::config::StreamConfig;
use crate::context::{ContextProjection, ContextSnapshotManager};
use crate::error::{StreamError, StreamResult};
use crate::event_store::{EventStore, StreamStats};
use crate::projection::Projection;
use crate::recovery::RecoveryReport;
use crate::stream::EventStream;
use crate::types::{
    Checkpoint, CheckpointOption, CheckpointOutcome, ContextSnapshotPayload, EventType,
    LedgerState, MemoryEntry, NewEvent, StreamEvent,
};
use crate::utils::cleanup_temp_files;

/// Composes the store, bus, managers and recovery behind one API
pub struct Orchestrator {
    config: StreamConfig,
    stream: Arc<EventStream>,
    checkpoints: CheckpointManager,
    contexts: ContextSnapshotManager,
    recovery: Mutex<RecoveryReport>,
}

impl Orchestrator {
    /// Open the log, replay it, and re-arm checkpoint timers
    pub async fn open(config: StreamConfig) -> StreamResult<Self> {
        config.validate()?;
        clean_mirror_dirs(&config);

        let store = EventStore::open(config.clone())?;
        let checkpoint_state = Arc::new(CheckpointProjection::new());
        let context_state = Arc::new(ContextProjection::new());
        let projections: Vec<Arc<dyn Projection>> =
            vec![checkpoint_state.clone(), context_state.clone()];
        let stream = Arc::new(EventStream::new(store, config.history_capacity, projections));

        let checkpoints = CheckpointManager::new(Arc::clone(&stream), checkpoint_state, &config);
        let contexts = ContextSnapshotManager::new(Arc::clone(&stream), context_state, &config);

        let orchestrator = Self {
            config,
            stream,
            checkpoints,
            contexts,
            recovery: Mutex::new(RecoveryReport::default()),
        };
        orchestrator.recover().await?;
        Ok(orchestrator)
    }

    /// Rebuild every projection from the log
    ///
    /// Runs automatically in [`open`](Self::open); calling it again yields
    /// the same state.
    pub async fn recover(&self) -> StreamResult<RecoveryReport> {
        let mut report = self.stream.recover().await?;
        report.pending_checkpoints = self.checkpoints.pending_checkpoints().len();
        report.sessions_with_snapshots = self.contexts.sessions().len();

        self.checkpoints.rearm_timers();
        self.checkpoints.write_mirror();

        if report.has_issues() {
            warn!("{}", report.summary());
        } else {
            info!("{}", report.summary());
        }
        *self.recovery.lock() = report.clone();
        Ok(report)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Report from the most recent recovery
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery.lock().clone()
    }

    /// Append a raw event
    ///
    /// `checkpoint.*` events are reserved for the checkpoint workflow and
    /// rejected here; use [`request_checkpoint`](Self::request_checkpoint)
    /// and friends.
    pub async fn append(&self, event: NewEvent) -> StreamResult<StreamEvent> {
        if matches!(event.event_type, EventType::CheckpointRequested)
            || event.event_type.is_checkpoint_resolution()
        {
            return Err(StreamError::validation(format!(
                "{} events are written by the checkpoint workflow",
                event.event_type
            )));
        }
        self.stream.append(event).await
    }

    /// Register a listener for one event type or all of them
    pub fn subscribe<F, Fut>(&self, filter: impl Into<EventFilter>, listener: F) -> Subscription
    where
        F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.stream.bus().subscribe(filter, listener)
    }

    /// Number of events appended since the log's genesis
    pub fn current_offset(&self) -> u64 {
        self.stream.current_offset()
    }

    /// Recent events, most recent first
    pub fn event_history(&self, event_type: Option<EventType>, limit: Option<usize>) -> Vec<StreamEvent> {
        self.stream.recent(event_type, limit)
    }

    pub async fn request_checkpoint(
        &self,
        session_id: &str,
        decision_point: &str,
        options: Vec<CheckpointOption>,
        requested_by: &str,
    ) -> StreamResult<Checkpoint> {
        self.checkpoints
            .request_checkpoint(session_id, decision_point, options, requested_by)
            .await
    }

    pub async fn approve_checkpoint(
        &self,
        checkpoint_id: &str,
        approver: &str,
        selected_option_id: Option<&str>,
    ) -> StreamResult<bool> {
        self.checkpoints
            .approve_checkpoint(checkpoint_id, approver, selected_option_id)
            .await
    }

    pub async fn reject_checkpoint(
        &self,
        checkpoint_id: &str,
        rejector: &str,
        reason: Option<&str>,
    ) -> StreamResult<bool> {
        self.checkpoints
            .reject_checkpoint(checkpoint_id, rejector, reason)
            .await
    }

    pub fn pending_checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.pending_checkpoints()
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.checkpoints.checkpoint(checkpoint_id)
    }

    /// Wait for a checkpoint decision; `None` for unknown ids
    pub async fn await_checkpoint(&self, checkpoint_id: &str) -> Option<CheckpointOutcome> {
        self.checkpoints.await_checkpoint(checkpoint_id).await
    }

    pub async fn create_context_snapshot(
        &self,
        session_id: &str,
        agent_name: &str,
        prompt: &str,
        memories: Vec<MemoryEntry>,
        ledger_state: LedgerState,
    ) -> StreamResult<StreamEvent> {
        self.contexts
            .create_context_snapshot(session_id, agent_name, prompt, memories, ledger_state)
            .await
    }

    pub fn restore_context(&self, session_id: &str) -> Option<ContextSnapshotPayload> {
        self.contexts.restore_context(session_id)
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn contexts(&self) -> &ContextSnapshotManager {
        &self.contexts
    }

    /// Storage statistics (scans every segment)
    pub async fn stats(&self) -> StreamResult<StreamStats> {
        self.stream.stats().await
    }

    /// Cancel checkpoint timers and release waiters
    pub fn shutdown(self) {
        self.checkpoints.shutdown();
        info!(offset = self.stream.current_offset(), "orchestrator shut down");
    }
}

/// Remove temp files an interrupted mirror write left behind
fn clean_mirror_dirs(config: &StreamConfig) {
    let checkpoint_dir = config
        .checkpoint_path
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty());
    let dirs = checkpoint_dir.into_iter().chain(config.snapshot_path.as_deref());

    for dir in dirs {
        match cleanup_temp_files(dir) {
            Ok(0) => {}
            Ok(cleaned) => info!(dir = %dir.display(), cleaned, "removed stale mirror temp files"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to clean mirror directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> StreamConfig {
        StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false)
    }

    #[tokio::test]
    async fn test_open_empty_log() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::open(config(&temp_dir)).await.unwrap();

        assert_eq!(orchestrator.current_offset(), 0);
        assert_eq!(orchestrator.recovery_report().events_replayed, 0);
        assert!(orchestrator.event_history(None, None).is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_events_are_reserved() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::open(config(&temp_dir)).await.unwrap();

        let err = orchestrator
            .append(NewEvent::new(
                EventType::CheckpointApproved,
                "s1",
                json!({"checkpointId": "cp_x", "resolvedBy": "alice", "resolvedAt": "2026-01-01T00:00:00Z"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(orchestrator.current_offset(), 0);
    }

    #[tokio::test]
    async fn test_stale_mirror_temp_files_removed_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let snapshots = temp_dir.path().join("snapshots");
        std::fs::create_dir_all(&snapshots).unwrap();
        std::fs::write(snapshots.join("s1.tmp"), "{").unwrap();

        let orchestrator = Orchestrator::open(config(&temp_dir).with_snapshot_path(&snapshots))
            .await
            .unwrap();

        assert!(!snapshots.join("s1.tmp").exists());
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_recover_through_shared_handle() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = Arc::new(Orchestrator::open(config(&temp_dir)).await.unwrap());
        orchestrator
            .append(NewEvent::new(EventType::SessionCreated, "s1", json!({})))
            .await
            .unwrap();

        let shared = Arc::clone(&orchestrator);
        let report = tokio::spawn(async move { shared.recover().await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.events_replayed, 1);
        assert_eq!(orchestrator.recovery_report(), report);
        assert_eq!(orchestrator.current_offset(), 1);
    }
}
