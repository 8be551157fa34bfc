//! Context Snapshot Manager
//!
//! Captures resumable agent state as `context.snapshot` events and answers
//! "what is the latest snapshot for this session". The view is a projection,
//! so it survives restarts through recovery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::projection::Projection;
use crate::stream::EventStream;
use crate::types::{
    ContextSnapshot, ContextSnapshotPayload, EventPayload, EventType, LedgerState, MemoryEntry,
    NewEvent, StreamEvent,
};
use crate::utils::{atomic_write_json, file_safe_name};

const CONTEXT_FEATURE: &str = "context preservation";

#[derive(Debug, Clone)]
struct LatestSnapshot {
    offset: u64,
    payload: ContextSnapshotPayload,
}

/// Latest snapshot per session, by highest offset
#[derive(Default)]
pub struct ContextProjection {
    latest: RwLock<HashMap<String, LatestSnapshot>>,
}

impl ContextProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, session_id: &str) -> Option<ContextSnapshotPayload> {
        self.latest.read().get(session_id).map(|s| s.payload.clone())
    }

    /// Sessions holding at least one snapshot, sorted
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.latest.read().keys().cloned().collect();
        sessions.sort();
        sessions
    }
}

impl Projection for ContextProjection {
    fn name(&self) -> &'static str {
        "context"
    }

    fn apply(&self, event: &StreamEvent) {
        if event.event_type != EventType::ContextSnapshot {
            return;
        }
        let payload = match event.parse_payload::<ContextSnapshotPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(offset = event.offset(), error = %e, "undecodable context snapshot");
                return;
            }
        };

        let mut latest = self.latest.write();
        match latest.get(&event.session_id) {
            Some(existing) if existing.offset > event.offset() => {}
            _ => {
                latest.insert(
                    event.session_id.clone(),
                    LatestSnapshot {
                        offset: event.offset(),
                        payload,
                    },
                );
            }
        }
    }

    fn reset(&self) {
        self.latest.write().clear();
    }
}

/// Capture and restore agent context
#[derive(Clone)]
pub struct ContextSnapshotManager {
    stream: Arc<EventStream>,
    state: Arc<ContextProjection>,
    enabled: bool,
    mirror_dir: Option<PathBuf>,
}

impl ContextSnapshotManager {
    pub fn new(stream: Arc<EventStream>, state: Arc<ContextProjection>, config: &StreamConfig) -> Self {
        Self {
            stream,
            state,
            enabled: config.enable_context_preservation,
            mirror_dir: config.snapshot_path.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Persist a snapshot and return the appended event
    pub async fn create_context_snapshot(
        &self,
        session_id: &str,
        agent_name: &str,
        prompt: &str,
        memories: Vec<MemoryEntry>,
        ledger_state: LedgerState,
    ) -> StreamResult<StreamEvent> {
        if !self.enabled {
            return Err(StreamError::FeatureDisabled(CONTEXT_FEATURE));
        }

        let payload = ContextSnapshotPayload {
            snapshot_id: format!("snap_{}", uuid::Uuid::new_v4().simple()),
            snapshot: ContextSnapshot {
                agent_name: agent_name.to_string(),
                prompt: prompt.to_string(),
                memories,
                ledger_state,
            },
        };
        let event = NewEvent::typed(session_id, EventPayload::ContextSnapshot(payload))?
            .with_agent(agent_name);
        let event = self.stream.append(event).await?;

        self.write_mirror(session_id);
        info!(
            session_id,
            agent_name,
            offset = event.offset(),
            "context snapshot captured"
        );
        Ok(event)
    }

    /// Latest snapshot for a session; `None` if there is none or the
    /// feature is disabled
    pub fn restore_context(&self, session_id: &str) -> Option<ContextSnapshotPayload> {
        if !self.enabled {
            debug!(session_id, "context preservation disabled; nothing to restore");
            return None;
        }
        self.state.latest(session_id)
    }

    /// Sessions that can be restored
    pub fn sessions(&self) -> Vec<String> {
        self.state.sessions()
    }

    /// Refresh `<snapshot_path>/<session>.json`; failures are only logged
    fn write_mirror(&self, session_id: &str) {
        let Some(dir) = &self.mirror_dir else {
            return;
        };
        let Some(snapshot) = self.state.latest(session_id) else {
            return;
        };
        let path = dir.join(format!("{}.json", file_safe_name(session_id)));
        if let Err(e) = atomic_write_json(&path, &snapshot) {
            warn!(path = %path.display(), error = %e, "failed to write snapshot mirror");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStore;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(config: StreamConfig) -> ContextSnapshotManager {
        let state = Arc::new(ContextProjection::new());
        let store = EventStore::open(config.clone()).unwrap();
        let projections: Vec<Arc<dyn Projection>> = vec![state.clone()];
        let stream = Arc::new(EventStream::new(store, 100, projections));
        ContextSnapshotManager::new(stream, state, &config)
    }

    fn config(temp_dir: &TempDir) -> StreamConfig {
        StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false)
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(config(&temp_dir));
        let memories = vec![MemoryEntry::new("fact", "tests live in tests/", 0.8)];
        let ledger = LedgerState {
            phase: "implementation".into(),
            completed_tasks: vec!["plan".into()],
            pending_tasks: vec!["code".into(), "review".into()],
        };

        let event = manager
            .create_context_snapshot("s1", "coder", "You are a coder", memories.clone(), ledger.clone())
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::ContextSnapshot);

        let restored = manager.restore_context("s1").unwrap();
        assert_eq!(restored.snapshot.agent_name, "coder");
        assert_eq!(restored.snapshot.memories, memories);
        assert_eq!(restored.snapshot.ledger_state, ledger);
        assert!(manager.restore_context("s2").is_none());
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(config(&temp_dir));

        for phase in ["planning", "coding", "review"] {
            manager
                .create_context_snapshot("s1", "coder", "p", vec![], LedgerState::new(phase))
                .await
                .unwrap();
        }

        let restored = manager.restore_context("s1").unwrap();
        assert_eq!(restored.snapshot.ledger_state.phase, "review");
    }

    #[tokio::test]
    async fn test_disabled_feature() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(config(&temp_dir).with_context_preservation(false));

        let err = manager
            .create_context_snapshot("s1", "coder", "p", vec![], LedgerState::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::FeatureDisabled(_)));
        assert!(manager.restore_context("s1").is_none());
    }

    #[tokio::test]
    async fn test_mirror_file_per_session() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("snapshots");
        let manager = setup(config(&temp_dir).with_snapshot_path(&dir));

        manager
            .create_context_snapshot("team/alpha", "coder", "p", vec![], LedgerState::new("x"))
            .await
            .unwrap();

        let mirrored: ContextSnapshotPayload =
            serde_json::from_str(&std::fs::read_to_string(dir.join("team_alpha.json")).unwrap())
                .unwrap();
        assert_eq!(mirrored.snapshot.ledger_state.phase, "x");
    }

    #[test]
    fn test_projection_ignores_lower_offsets() {
        let projection = ContextProjection::new();
        let snapshot = |phase: &str, offset: u64| {
            NewEvent::new(
                EventType::ContextSnapshot,
                "s1",
                json!({
                    "snapshotId": format!("snap-{}", offset),
                    "agentName": "coder",
                    "prompt": "p",
                    "ledgerState": {"phase": phase}
                }),
            )
            .into_event(format!("e{}", offset), Utc::now(), offset)
        };

        projection.apply(&snapshot("late", 5));
        projection.apply(&snapshot("early", 3));

        assert_eq!(projection.latest("s1").unwrap().snapshot.ledger_state.phase, "late");
    }
}
