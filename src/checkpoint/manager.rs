//! Checkpoint Manager
//!
//! Owns the human-approval workflow on top of the stream: requesting a
//! gate, resolving it exactly once, expiring it after a timeout and waking
//! any task waiting on the decision.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::stream::EventStream;
use crate::types::{
    Checkpoint, CheckpointOption, CheckpointOutcome, CheckpointRequestedPayload,
    CheckpointResolvedPayload, CheckpointStatus, EventPayload, NewEvent,
};
use crate::utils::atomic_write_json;

use super::projection::CheckpointProjection;

const HITL_FEATURE: &str = "human-in-the-loop checkpoints";

/// Actor recorded on expiry events
pub const SYSTEM_ACTOR: &str = "system";

/// Reason recorded on expiry events
pub const TIMEOUT_REASON: &str = "timeout";

#[derive(Debug, Clone)]
struct CheckpointSettings {
    enabled: bool,
    max_pending: usize,
    timeout: Option<Duration>,
    mirror_path: Option<PathBuf>,
}

struct Inner {
    stream: Arc<EventStream>,
    state: Arc<CheckpointProjection>,
    settings: CheckpointSettings,
    /// Requests admitted but not yet in the pending set
    reserved: Mutex<usize>,
    /// Checkpoints with a resolution write in flight
    claims: Mutex<HashSet<String>>,
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<CheckpointOutcome>>>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    mirror_lock: Mutex<()>,
}

/// Human-in-the-loop approval gates
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CheckpointManager {
    inner: Arc<Inner>,
}

impl CheckpointManager {
    pub fn new(
        stream: Arc<EventStream>,
        state: Arc<CheckpointProjection>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                stream,
                state,
                settings: CheckpointSettings {
                    enabled: config.enable_human_in_loop,
                    max_pending: config.max_checkpoints,
                    timeout: config.checkpoint_timeout(),
                    mirror_path: config.checkpoint_path.clone(),
                },
                reserved: Mutex::new(0),
                claims: Mutex::new(HashSet::new()),
                waiters: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                mirror_lock: Mutex::new(()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.settings.enabled
    }

    fn ensure_enabled(&self) -> StreamResult<()> {
        if self.inner.settings.enabled {
            Ok(())
        } else {
            Err(StreamError::FeatureDisabled(HITL_FEATURE))
        }
    }

    /// Open a new approval gate and persist `checkpoint.requested`
    ///
    /// Fails with `CheckpointCapacity` when the pending set is full.
    pub async fn request_checkpoint(
        &self,
        session_id: &str,
        decision_point: &str,
        options: Vec<CheckpointOption>,
        requested_by: &str,
    ) -> StreamResult<Checkpoint> {
        self.ensure_enabled()?;
        let checkpoint = Checkpoint::new(
            session_id,
            decision_point,
            options,
            requested_by,
            self.inner.settings.timeout,
        )?;
        let event = NewEvent::typed(
            session_id,
            EventPayload::CheckpointRequested(CheckpointRequestedPayload {
                checkpoint: checkpoint.clone(),
            }),
        )?
        .with_agent(requested_by);

        let reservation = self.reserve_slot(&checkpoint)?;
        let appended = self.inner.stream.append(event).await;
        drop(reservation);
        appended?;

        info!(
            checkpoint_id = %checkpoint.id,
            session_id,
            requested_by,
            options = checkpoint.options.len(),
            "checkpoint requested"
        );
        Ok(checkpoint)
    }

    fn reserve_slot(&self, checkpoint: &Checkpoint) -> StreamResult<SlotReservation> {
        let mut reserved = self.inner.reserved.lock();
        let max = self.inner.settings.max_pending;
        if self.inner.state.pending_count() + *reserved >= max {
            warn!(max, "checkpoint capacity reached");
            return Err(StreamError::CheckpointCapacity { max });
        }
        *reserved += 1;
        Ok(SlotReservation {
            manager: self.clone(),
            checkpoint: checkpoint.clone(),
        })
    }

    /// Approve a pending checkpoint
    ///
    /// Returns `false` if the checkpoint is unknown or already resolved.
    /// A `selected_option_id` must name one of the checkpoint's options.
    pub async fn approve_checkpoint(
        &self,
        checkpoint_id: &str,
        approver: &str,
        selected_option_id: Option<&str>,
    ) -> StreamResult<bool> {
        self.ensure_enabled()?;
        self.resolve(
            checkpoint_id,
            CheckpointStatus::Approved,
            approver,
            selected_option_id.map(str::to_string),
            None,
        )
        .await
    }

    /// Reject a pending checkpoint
    ///
    /// Returns `false` if the checkpoint is unknown or already resolved.
    pub async fn reject_checkpoint(
        &self,
        checkpoint_id: &str,
        rejector: &str,
        reason: Option<&str>,
    ) -> StreamResult<bool> {
        self.ensure_enabled()?;
        self.resolve(
            checkpoint_id,
            CheckpointStatus::Rejected,
            rejector,
            None,
            reason.map(str::to_string),
        )
        .await
    }

    /// Expire a pending checkpoint as if its timer had fired
    pub async fn expire_checkpoint(&self, checkpoint_id: &str) -> StreamResult<bool> {
        self.resolve(
            checkpoint_id,
            CheckpointStatus::Expired,
            SYSTEM_ACTOR,
            None,
            Some(TIMEOUT_REASON.to_string()),
        )
        .await
    }

    /// Currently pending checkpoints, oldest first
    pub fn pending_checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.state.pending()
    }

    /// Look up a checkpoint in any state
    pub fn checkpoint(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.inner.state.get(checkpoint_id)
    }

    /// Wait until a checkpoint is resolved
    ///
    /// Returns immediately for settled checkpoints and `None` for unknown
    /// ids or when the manager shuts down first.
    pub async fn await_checkpoint(&self, checkpoint_id: &str) -> Option<CheckpointOutcome> {
        let receiver = {
            let mut waiters = self.inner.waiters.lock();
            let checkpoint = self.inner.state.get(checkpoint_id)?;
            if let Some(outcome) = CheckpointOutcome::from_checkpoint(&checkpoint) {
                return Some(outcome);
            }
            let (tx, rx) = oneshot::channel();
            waiters.entry(checkpoint_id.to_string()).or_default().push(tx);
            rx
        };
        receiver.await.ok()
    }

    async fn resolve(
        &self,
        checkpoint_id: &str,
        status: CheckpointStatus,
        resolved_by: &str,
        selected_option_id: Option<String>,
        reason: Option<String>,
    ) -> StreamResult<bool> {
        let (checkpoint, claim) = {
            let mut claims = self.inner.claims.lock();
            let Some(checkpoint) = self.inner.state.get_pending(checkpoint_id) else {
                debug!(checkpoint_id, status = %status, "checkpoint not pending");
                return Ok(false);
            };
            if claims.contains(checkpoint_id) {
                debug!(checkpoint_id, status = %status, "checkpoint resolution already in flight");
                return Ok(false);
            }
            if let Some(option_id) = &selected_option_id {
                if checkpoint.option(option_id).is_none() {
                    return Err(StreamError::validation(format!(
                        "checkpoint {} has no option '{}'",
                        checkpoint_id, option_id
                    )));
                }
            }
            claims.insert(checkpoint_id.to_string());
            let claim = ResolutionClaim {
                manager: self.clone(),
                checkpoint_id: checkpoint_id.to_string(),
            };
            (checkpoint, claim)
        };

        let payload = CheckpointResolvedPayload {
            checkpoint_id: checkpoint_id.to_string(),
            resolved_by: resolved_by.to_string(),
            resolved_at: Utc::now(),
            selected_option_id,
            reason,
        };
        let payload = match status {
            CheckpointStatus::Approved => EventPayload::CheckpointApproved(payload),
            CheckpointStatus::Rejected => EventPayload::CheckpointRejected(payload),
            CheckpointStatus::Expired | CheckpointStatus::Pending => {
                EventPayload::CheckpointExpired(payload)
            }
        };

        let appended = match NewEvent::typed(&checkpoint.session_id, payload) {
            Ok(event) => self.inner.stream.append(event.with_agent(resolved_by)).await,
            Err(e) => Err(e),
        };
        drop(claim);
        appended?;

        info!(checkpoint_id, status = %status, resolved_by, "checkpoint resolved");
        Ok(true)
    }

    /// Side effects of a durable resolution: stop the timer, wake waiters
    /// and refresh the mirror
    fn settle_resolved(&self, checkpoint_id: &str) {
        if let Some(timer) = self.inner.timers.lock().remove(checkpoint_id) {
            timer.abort();
        }
        self.notify_waiters(checkpoint_id);
        self.write_mirror();
    }

    fn notify_waiters(&self, checkpoint_id: &str) {
        let mut waiters = self.inner.waiters.lock();
        let Some(senders) = waiters.remove(checkpoint_id) else {
            return;
        };
        let Some(outcome) = self
            .inner
            .state
            .get(checkpoint_id)
            .as_ref()
            .and_then(CheckpointOutcome::from_checkpoint)
        else {
            return;
        };
        for sender in senders {
            let _ = sender.send(outcome.clone());
        }
    }

    /// Schedule expiry for a pending checkpoint with a deadline
    fn arm_timer(&self, checkpoint: &Checkpoint) {
        let Some(delay) = checkpoint.remaining(Utc::now()) else {
            return;
        };
        let checkpoint_id = checkpoint.id.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_id = checkpoint_id.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(checkpoint_id = %checkpoint_id, "no runtime to arm checkpoint timer");
            return;
        };
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach from the timer table before resolving so the resolution
            // path never aborts the task running it.
            inner.timers.lock().remove(&task_id);
            let manager = CheckpointManager { inner };
            match manager.expire_checkpoint(&task_id).await {
                Ok(true) => info!(checkpoint_id = %task_id, "checkpoint expired"),
                Ok(false) => debug!(checkpoint_id = %task_id, "checkpoint settled before expiry"),
                Err(e) => error!(checkpoint_id = %task_id, error = %e, "failed to expire checkpoint"),
            }
        });

        if let Some(previous) = self.inner.timers.lock().insert(checkpoint_id, handle) {
            previous.abort();
        }
    }

    /// Re-arm expiry for everything still pending, e.g. after recovery
    ///
    /// Overdue checkpoints expire right away. Nothing is armed while expiry
    /// or the workflow is disabled.
    pub(crate) fn rearm_timers(&self) -> usize {
        if !self.inner.settings.enabled || self.inner.settings.timeout.is_none() {
            return 0;
        }
        let pending = self.inner.state.pending();
        let mut armed = 0;
        for checkpoint in &pending {
            if checkpoint.timeout_at.is_some() {
                self.arm_timer(checkpoint);
                armed += 1;
            }
        }
        if armed > 0 {
            info!(armed, "re-armed checkpoint timers");
        }
        armed
    }

    /// Refresh the pending-set mirror file, if configured
    ///
    /// The mirror is a convenience for external tools; the log stays the
    /// source of truth, so failures are only logged.
    pub(crate) fn write_mirror(&self) {
        let Some(path) = &self.inner.settings.mirror_path else {
            return;
        };
        let _guard = self.inner.mirror_lock.lock();
        let pending = self.inner.state.pending();
        if let Err(e) = atomic_write_json(path, &pending) {
            warn!(path = %path.display(), error = %e, "failed to write checkpoint mirror");
        }
    }

    /// Cancel all timers and release waiters
    pub fn shutdown(&self) {
        let timers: Vec<JoinHandle<()>> = self.inner.timers.lock().drain().map(|(_, h)| h).collect();
        for timer in timers {
            timer.abort();
        }
        self.inner.waiters.lock().clear();
    }
}

/// A capacity slot held while `checkpoint.requested` is being written
///
/// Released on drop, so a cancelled request never leaks capacity. If the
/// event became durable the timer and mirror are brought up to date.
struct SlotReservation {
    manager: CheckpointManager,
    checkpoint: Checkpoint,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        let inner = &self.manager.inner;
        *inner.reserved.lock() -= 1;
        if inner.state.get_pending(&self.checkpoint.id).is_some() {
            self.manager.arm_timer(&self.checkpoint);
            self.manager.write_mirror();
        }
    }
}

/// Exclusive right to write the resolution of one checkpoint
///
/// Released on drop, so a cancelled resolve never wedges the checkpoint.
/// If the resolution became durable its side effects run here.
struct ResolutionClaim {
    manager: CheckpointManager,
    checkpoint_id: String,
}

impl Drop for ResolutionClaim {
    fn drop(&mut self) {
        self.manager.inner.claims.lock().remove(&self.checkpoint_id);
        if self.manager.inner.state.get_pending(&self.checkpoint_id).is_none() {
            self.manager.settle_resolved(&self.checkpoint_id);
        }
    }
}
