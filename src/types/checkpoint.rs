//! Checkpoint types for human-in-the-loop approval gates

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// One choice offered to the approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointOption {
    /// Unique within its checkpoint
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Action the workflow takes if this option is chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl CheckpointOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            action: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Lifecycle state; every state except `Pending` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl CheckpointStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckpointStatus::Pending)
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Approved => "approved",
            CheckpointStatus::Rejected => "rejected",
            CheckpointStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A human approval gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    /// Human-readable question
    pub decision_point: String,
    pub options: Vec<CheckpointOption>,
    pub requested_by: String,
    pub status: CheckpointStatus,
    /// Set only on approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Rejection reason, or `timeout` for expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Build a pending checkpoint, validating its options
    pub fn new(
        session_id: impl Into<String>,
        decision_point: impl Into<String>,
        options: Vec<CheckpointOption>,
        requested_by: impl Into<String>,
        timeout: Option<std::time::Duration>,
    ) -> StreamResult<Self> {
        let created_at = Utc::now();
        let timeout_at = timeout.map(|t| deadline(created_at, t)).transpose()?;
        let checkpoint = Self {
            id: format!("cp_{}", uuid::Uuid::new_v4().simple()),
            session_id: session_id.into(),
            decision_point: decision_point.into(),
            options,
            requested_by: requested_by.into(),
            status: CheckpointStatus::Pending,
            selected_option_id: None,
            resolved_by: None,
            resolved_at: None,
            reason: None,
            created_at,
            timeout_at,
        };
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Structural checks: required fields, non-empty and unique option ids
    pub fn validate(&self) -> StreamResult<()> {
        if self.id.trim().is_empty() {
            return Err(StreamError::validation("checkpoint id must not be empty"));
        }
        if self.session_id.trim().is_empty() {
            return Err(StreamError::validation("sessionId must not be empty"));
        }
        if self.decision_point.trim().is_empty() {
            return Err(StreamError::validation("decisionPoint must not be empty"));
        }
        validate_options(&self.options)
    }

    pub fn option(&self, option_id: &str) -> Option<&CheckpointOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }

    /// Time left before expiry, `None` if the checkpoint never expires
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.timeout_at
            .map(|at| (at - now).to_std().unwrap_or(std::time::Duration::ZERO))
    }

    /// Apply a terminal transition; returns false if already terminal
    pub(crate) fn resolve(
        &mut self,
        status: CheckpointStatus,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
        selected_option_id: Option<String>,
        reason: Option<String>,
    ) -> bool {
        if !self.is_pending() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.resolved_by = Some(resolved_by.to_string());
        self.resolved_at = Some(resolved_at);
        if status == CheckpointStatus::Approved {
            self.selected_option_id = selected_option_id;
        }
        self.reason = reason;
        true
    }
}

/// `start + timeout`, or a validation error if it is not representable
fn deadline(start: DateTime<Utc>, timeout: std::time::Duration) -> StreamResult<DateTime<Utc>> {
    i64::try_from(timeout.as_millis())
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .ok_or_else(|| {
            StreamError::validation(format!("checkpoint timeout out of range: {:?}", timeout))
        })
}

/// Reject empty option lists and duplicate option ids
pub fn validate_options(options: &[CheckpointOption]) -> StreamResult<()> {
    if options.is_empty() {
        return Err(StreamError::validation(
            "a checkpoint needs at least one option",
        ));
    }
    let mut seen = HashSet::new();
    for option in options {
        if option.id.trim().is_empty() {
            return Err(StreamError::validation("option id must not be empty"));
        }
        if !seen.insert(option.id.as_str()) {
            return Err(StreamError::validation(format!(
                "duplicate option id: {}",
                option.id
            )));
        }
    }
    Ok(())
}

/// What a waiting workflow learns when a checkpoint resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointOutcome {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<CheckpointOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckpointOutcome {
    /// Outcome for an already-terminal checkpoint
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Option<Self> {
        match checkpoint.status {
            CheckpointStatus::Pending => None,
            CheckpointStatus::Approved => Some(Self {
                approved: true,
                selected_option: checkpoint
                    .selected_option_id
                    .as_deref()
                    .and_then(|id| checkpoint.option(id))
                    .cloned(),
                reason: None,
            }),
            CheckpointStatus::Rejected | CheckpointStatus::Expired => Some(Self {
                approved: false,
                selected_option: None,
                reason: checkpoint.reason.clone(),
            }),
        }
    }
}
