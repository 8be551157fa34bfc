//! Pending/resolved checkpoint view derived from the log

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::projection::Projection;
use crate::types::{
    Checkpoint, CheckpointRequestedPayload, CheckpointResolvedPayload, CheckpointStatus, EventType,
    StreamEvent,
};

#[derive(Default)]
struct CheckpointState {
    pending: HashMap<String, Checkpoint>,
    resolved: HashMap<String, Checkpoint>,
}

/// Folds `checkpoint.*` events into the set of known checkpoints
///
/// The first resolution event for a checkpoint wins; later ones are ignored.
#[derive(Default)]
pub struct CheckpointProjection {
    state: RwLock<CheckpointState>,
}

impl CheckpointProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a checkpoint in any state
    pub fn get(&self, id: &str) -> Option<Checkpoint> {
        let state = self.state.read();
        state
            .pending
            .get(id)
            .or_else(|| state.resolved.get(id))
            .cloned()
    }

    pub fn get_pending(&self, id: &str) -> Option<Checkpoint> {
        self.state.read().pending.get(id).cloned()
    }

    /// Pending checkpoints, oldest request first
    pub fn pending(&self) -> Vec<Checkpoint> {
        let mut pending: Vec<Checkpoint> = self.state.read().pending.values().cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    fn on_requested(&self, event: &StreamEvent) {
        let checkpoint = match event.parse_payload::<CheckpointRequestedPayload>() {
            Ok(payload) => payload.checkpoint,
            Err(e) => {
                warn!(offset = event.offset(), error = %e, "undecodable checkpoint request");
                return;
            }
        };

        let mut state = self.state.write();
        if state.pending.contains_key(&checkpoint.id) || state.resolved.contains_key(&checkpoint.id) {
            debug!(checkpoint_id = %checkpoint.id, "duplicate checkpoint request ignored");
            return;
        }
        state.pending.insert(checkpoint.id.clone(), checkpoint);
    }

    fn on_resolved(&self, event: &StreamEvent, status: CheckpointStatus) {
        let payload = match event.parse_payload::<CheckpointResolvedPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(offset = event.offset(), error = %e, "undecodable checkpoint resolution");
                return;
            }
        };

        let mut state = self.state.write();
        let Some(mut checkpoint) = state.pending.remove(&payload.checkpoint_id) else {
            debug!(
                checkpoint_id = %payload.checkpoint_id,
                status = %status,
                "resolution for unknown or settled checkpoint ignored"
            );
            return;
        };
        checkpoint.resolve(
            status,
            &payload.resolved_by,
            payload.resolved_at,
            payload.selected_option_id,
            payload.reason,
        );
        state.resolved.insert(checkpoint.id.clone(), checkpoint);
    }
}

fn resolution_status(event_type: EventType) -> Option<CheckpointStatus> {
    match event_type {
        EventType::CheckpointApproved => Some(CheckpointStatus::Approved),
        EventType::CheckpointRejected => Some(CheckpointStatus::Rejected),
        EventType::CheckpointExpired => Some(CheckpointStatus::Expired),
        _ => None,
    }
}

impl Projection for CheckpointProjection {
    fn name(&self) -> &'static str {
        "checkpoints"
    }

    fn apply(&self, event: &StreamEvent) {
        if event.event_type == EventType::CheckpointRequested {
            self.on_requested(event);
        } else if let Some(status) = resolution_status(event.event_type) {
            self.on_resolved(event, status);
        }
    }

    fn reset(&self) {
        let mut state = self.state.write();
        state.pending.clear();
        state.resolved.clear();
    }
}
