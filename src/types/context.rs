//! Resumable agent state captured in `context.snapshot` events

use serde::{Deserialize, Serialize};

/// A memory the agent considered relevant when the snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
}

impl MemoryEntry {
    pub fn new(memory_type: impl Into<String>, content: impl Into<String>, relevance_score: f64) -> Self {
        Self {
            memory_type: memory_type.into(),
            content: content.into(),
            relevance_score,
            source_event_id: None,
        }
    }

    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }
}

/// Workflow ledger at snapshot time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub phase: String,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
}

impl LedgerState {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            ..Default::default()
        }
    }
}

/// Everything needed to resume an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub agent_name: String,
    pub prompt: String,
    #[serde(default)]
    pub memories: Vec<MemoryEntry>,
    pub ledger_state: LedgerState,
}
