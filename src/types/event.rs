//! Event types for the durable stream
//!
//! A [`StreamEvent`] is one immutable line of the log. Its `payload` is kept
//! as opaque JSON on the wire, but every append is checked against the typed
//! schema in [`EventPayload`] first, so downstream readers can rely on
//! [`StreamEvent::typed_payload`] succeeding for anything this crate wrote.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::checkpoint::{Checkpoint, CheckpointStatus};
use super::context::ContextSnapshot;
use crate::error::{StreamError, StreamResult};

/// Declares the closed set of event kinds together with their wire names and
/// payload schemas.
macro_rules! define_events {
    ($( $(#[$doc:meta])* $variant:ident => $wire:literal : $payload:ty ),+ $(,)?) => {
        /// Event kinds that can appear in the stream
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EventType {
            $( $(#[$doc])* #[serde(rename = $wire)] $variant, )+
        }

        impl EventType {
            /// Every known event type, in declaration order
            pub const ALL: &'static [EventType] = &[$(EventType::$variant),+];

            /// Wire name, e.g. `checkpoint.requested`
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( EventType::$variant => $wire, )+
                }
            }
        }

        impl FromStr for EventType {
            type Err = StreamError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(EventType::$variant), )+
                    other => Err(StreamError::validation(format!("unknown event type: {}", other))),
                }
            }
        }

        /// Typed payload for each event type
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventPayload {
            $( $variant($payload), )+
        }

        impl EventPayload {
            /// The event type this payload belongs to
            pub fn event_type(&self) -> EventType {
                match self {
                    $( EventPayload::$variant(_) => EventType::$variant, )+
                }
            }

            /// Decode raw JSON against the schema of `event_type`
            pub fn decode(event_type: EventType, value: &Value) -> StreamResult<Self> {
                match event_type {
                    $( EventType::$variant => decode_as::<$payload>(event_type, value).map(EventPayload::$variant), )+
                }
            }

            /// Encode back into the opaque wire form
            pub fn to_value(&self) -> StreamResult<Value> {
                let value = match self {
                    $( EventPayload::$variant(inner) => serde_json::to_value(inner)?, )+
                };
                Ok(value)
            }
        }
    };
}

define_events! {
    /// A new session started
    SessionCreated => "session.created": SessionPayload,
    /// A suspended session was resumed
    SessionResumed => "session.resumed": SessionPayload,
    /// A session finished
    SessionEnded => "session.ended": SessionPayload,
    /// An agent was started for a task
    AgentSpawned => "agent.spawned": AgentSpawnedPayload,
    /// An agent finished its task
    AgentCompleted => "agent.completed": AgentCompletedPayload,
    /// An agent failed
    AgentFailed => "agent.failed": AgentFailedPayload,
    /// Work moved from one agent to another
    AgentHandoff => "agent.handoff": AgentHandoffPayload,
    /// A human approval gate was opened
    CheckpointRequested => "checkpoint.requested": CheckpointRequestedPayload,
    /// A checkpoint was approved
    CheckpointApproved => "checkpoint.approved": CheckpointResolvedPayload,
    /// A checkpoint was rejected
    CheckpointRejected => "checkpoint.rejected": CheckpointResolvedPayload,
    /// A checkpoint timed out
    CheckpointExpired => "checkpoint.expired": CheckpointResolvedPayload,
    /// Resumable agent state was captured
    ContextSnapshot => "context.snapshot": ContextSnapshotPayload,
    /// A reusable learning was extracted
    LearningExtracted => "learning.extracted": LearningPayload,
    /// Progress on a task was reported
    TaskProgress => "task.progress": TaskProgressPayload,
}

fn decode_as<T: DeserializeOwned>(event_type: EventType, value: &Value) -> StreamResult<T> {
    T::deserialize(value).map_err(|e| {
        StreamError::validation(format!("invalid {} payload: {}", event_type, e))
    })
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventType {
    /// True for the three terminal checkpoint transitions
    pub fn is_checkpoint_resolution(&self) -> bool {
        matches!(
            self,
            EventType::CheckpointApproved | EventType::CheckpointRejected | EventType::CheckpointExpired
        )
    }
}

fn require_non_empty(field: &str, value: &str) -> StreamResult<()> {
    if value.trim().is_empty() {
        return Err(StreamError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Payload for session lifecycle events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Free-form details supplied by the lifecycle layer
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Payload for `agent.spawned`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawnedPayload {
    pub agent_name: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent: Option<String>,
}

/// Payload for `agent.completed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCompletedPayload {
    pub agent_name: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Payload for `agent.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFailedPayload {
    pub agent_name: String,
    pub error: String,
    #[serde(default)]
    pub recoverable: bool,
}

/// Payload for `agent.handoff`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHandoffPayload {
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

/// Payload for `checkpoint.requested`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequestedPayload {
    pub checkpoint: Checkpoint,
}

/// Payload for `checkpoint.{approved,rejected,expired}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResolvedPayload {
    pub checkpoint_id: String,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `context.snapshot`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshotPayload {
    pub snapshot_id: String,
    #[serde(flatten)]
    pub snapshot: ContextSnapshot,
}

/// Payload for `learning.extracted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPayload {
    pub content: String,
    pub category: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Status reported with `task.progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    #[default]
    InProgress,
    Blocked,
    Completed,
}

/// Payload for `task.progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressPayload {
    pub task_id: String,
    /// Percent complete, 0 to 100
    pub progress: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventPayload {
    /// Semantic checks beyond the JSON shape
    pub fn validate(&self) -> StreamResult<()> {
        match self {
            EventPayload::SessionCreated(_)
            | EventPayload::SessionResumed(_)
            | EventPayload::SessionEnded(_) => Ok(()),
            EventPayload::AgentSpawned(p) => {
                require_non_empty("agentName", &p.agent_name)?;
                require_non_empty("task", &p.task)
            }
            EventPayload::AgentCompleted(p) => require_non_empty("agentName", &p.agent_name),
            EventPayload::AgentFailed(p) => {
                require_non_empty("agentName", &p.agent_name)?;
                require_non_empty("error", &p.error)
            }
            EventPayload::AgentHandoff(p) => {
                require_non_empty("fromAgent", &p.from_agent)?;
                require_non_empty("toAgent", &p.to_agent)
            }
            EventPayload::CheckpointRequested(p) => {
                p.checkpoint.validate()?;
                if p.checkpoint.status != CheckpointStatus::Pending {
                    return Err(StreamError::validation(
                        "a requested checkpoint must be pending",
                    ));
                }
                Ok(())
            }
            EventPayload::CheckpointApproved(p)
            | EventPayload::CheckpointRejected(p)
            | EventPayload::CheckpointExpired(p) => {
                require_non_empty("checkpointId", &p.checkpoint_id)?;
                require_non_empty("resolvedBy", &p.resolved_by)
            }
            EventPayload::ContextSnapshot(p) => {
                require_non_empty("snapshotId", &p.snapshot_id)?;
                require_non_empty("agentName", &p.snapshot.agent_name)
            }
            EventPayload::LearningExtracted(p) => {
                require_non_empty("content", &p.content)?;
                require_non_empty("category", &p.category)?;
                if !(0.0..=1.0).contains(&p.confidence) {
                    return Err(StreamError::validation(format!(
                        "confidence must be within 0..=1, got {}",
                        p.confidence
                    )));
                }
                Ok(())
            }
            EventPayload::TaskProgress(p) => {
                require_non_empty("taskId", &p.task_id)?;
                if p.progress > 100 {
                    return Err(StreamError::validation(format!(
                        "progress must be within 0..=100, got {}",
                        p.progress
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Keys owned by [`EventMetadata`] that extensions may not shadow
const RESERVED_METADATA_KEYS: &[&str] =
    &["offset", "correlationId", "sourceAgent", "targetAgent", "duration"];

/// Per-event metadata; `offset` is assigned by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Global, strictly increasing position in the log (1-based)
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// An immutable, persisted fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Globally unique identifier, assigned at append time
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Event-specific data; see [`EventPayload`] for the schema per type
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    pub metadata: EventMetadata,
}

impl StreamEvent {
    pub fn offset(&self) -> u64 {
        self.metadata.offset
    }

    /// Parse the payload as a specific type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Decode the payload using the schema of this event's type
    pub fn typed_payload(&self) -> StreamResult<EventPayload> {
        EventPayload::decode(self.event_type, &self.payload)
    }

    /// Serialize event to a single log line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a single log line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// A not-yet-persisted event as submitted by a caller
///
/// The store fills in `id`, `timestamp` and `metadata.offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub session_id: String,
    pub agent: Option<String>,
    pub payload: Value,
    pub parent_event_id: Option<String>,
    pub correlation_id: Option<String>,
    pub source_agent: Option<String>,
    pub target_agent: Option<String>,
    pub duration_ms: Option<u64>,
    pub extensions: Map<String, Value>,
}

impl NewEvent {
    /// Create a raw event; the payload is validated at append time
    pub fn new(event_type: EventType, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            agent: None,
            payload,
            parent_event_id: None,
            correlation_id: None,
            source_agent: None,
            target_agent: None,
            duration_ms: None,
            extensions: Map::new(),
        }
    }

    /// Create an event from a typed payload
    pub fn typed(session_id: impl Into<String>, payload: EventPayload) -> StreamResult<Self> {
        Ok(Self::new(payload.event_type(), session_id, payload.to_value()?))
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_source_agent(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = Some(agent.into());
        self
    }

    pub fn with_target_agent(mut self, agent: impl Into<String>) -> Self {
        self.target_agent = Some(agent.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach an extension metadata field
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Check required fields and the typed payload schema
    pub fn validate(&self) -> StreamResult<EventPayload> {
        require_non_empty("sessionId", &self.session_id)?;
        if !self.payload.is_object() {
            return Err(StreamError::validation(format!(
                "{} payload must be a JSON object",
                self.event_type
            )));
        }
        if let Some(key) = self
            .extensions
            .keys()
            .find(|k| RESERVED_METADATA_KEYS.contains(&k.as_str()))
        {
            return Err(StreamError::validation(format!(
                "metadata extension '{}' shadows a reserved field",
                key
            )));
        }
        let typed = EventPayload::decode(self.event_type, &self.payload)?;
        typed.validate()?;
        Ok(typed)
    }

    /// Finalize into a persisted event shape
    pub(crate) fn into_event(self, id: String, timestamp: DateTime<Utc>, offset: u64) -> StreamEvent {
        StreamEvent {
            id,
            event_type: self.event_type,
            session_id: self.session_id,
            agent: self.agent,
            payload: self.payload,
            timestamp,
            parent_event_id: self.parent_event_id,
            metadata: EventMetadata {
                offset,
                correlation_id: self.correlation_id,
                source_agent: self.source_agent,
                target_agent: self.target_agent,
                duration: self.duration_ms,
                extensions: self.extensions,
            },
        }
    }
}
