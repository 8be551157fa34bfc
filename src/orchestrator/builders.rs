//! Typed convenience builders
//!
//! Each builder constructs a typed payload and goes through the same append
//! path as any other event.

use serde_json::{Map, Value};

use crate::error::StreamResult;
use crate::types::{
    AgentCompletedPayload, AgentFailedPayload, AgentHandoffPayload, AgentSpawnedPayload,
    EventPayload, LearningPayload, NewEvent, SessionPayload, StreamEvent, TaskProgressPayload,
    TaskStatus,
};

use super::Orchestrator;

impl Orchestrator {
    /// Record `session.created` with free-form details
    pub async fn start_session(
        &self,
        session_id: &str,
        details: Map<String, Value>,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::SessionCreated(SessionPayload {
            reason: None,
            details,
        });
        self.stream.append(NewEvent::typed(session_id, payload)?).await
    }

    /// Record `session.ended`
    pub async fn end_session(&self, session_id: &str, reason: Option<&str>) -> StreamResult<StreamEvent> {
        let payload = EventPayload::SessionEnded(SessionPayload {
            reason: reason.map(str::to_string),
            details: Map::new(),
        });
        self.stream.append(NewEvent::typed(session_id, payload)?).await
    }

    /// Record `agent.spawned`
    pub async fn spawn_agent(
        &self,
        session_id: &str,
        agent_name: &str,
        task: &str,
        parent_agent: Option<&str>,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::AgentSpawned(AgentSpawnedPayload {
            agent_name: agent_name.to_string(),
            task: task.to_string(),
            parent_agent: parent_agent.map(str::to_string),
        });
        let mut event = NewEvent::typed(session_id, payload)?.with_agent(agent_name);
        if let Some(parent) = parent_agent {
            event = event.with_source_agent(parent).with_target_agent(agent_name);
        }
        self.stream.append(event).await
    }

    /// Record `agent.completed`
    pub async fn complete_agent(
        &self,
        session_id: &str,
        agent_name: &str,
        result: Value,
        duration_ms: Option<u64>,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::AgentCompleted(AgentCompletedPayload {
            agent_name: agent_name.to_string(),
            result,
            duration_ms,
        });
        let mut event = NewEvent::typed(session_id, payload)?.with_agent(agent_name);
        if let Some(ms) = duration_ms {
            event = event.with_duration_ms(ms);
        }
        self.stream.append(event).await
    }

    /// Record `agent.failed`
    pub async fn fail_agent(
        &self,
        session_id: &str,
        agent_name: &str,
        error: &str,
        recoverable: bool,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::AgentFailed(AgentFailedPayload {
            agent_name: agent_name.to_string(),
            error: error.to_string(),
            recoverable,
        });
        let event = NewEvent::typed(session_id, payload)?.with_agent(agent_name);
        self.stream.append(event).await
    }

    /// Record `agent.handoff`, linked to the snapshot taken for it if any
    pub async fn handoff_agent(
        &self,
        session_id: &str,
        from_agent: &str,
        to_agent: &str,
        reason: Option<&str>,
        snapshot: Option<&StreamEvent>,
    ) -> StreamResult<StreamEvent> {
        let snapshot_id = snapshot
            .and_then(|e| e.payload.get("snapshotId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let payload = EventPayload::AgentHandoff(AgentHandoffPayload {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            reason: reason.map(str::to_string),
            snapshot_id,
        });

        let mut event = NewEvent::typed(session_id, payload)?
            .with_agent(from_agent)
            .with_source_agent(from_agent)
            .with_target_agent(to_agent);
        if let Some(snapshot) = snapshot {
            event = event.with_parent(snapshot.id.clone());
        }
        self.stream.append(event).await
    }

    /// Record `task.progress`
    pub async fn progress_task(
        &self,
        session_id: &str,
        task_id: &str,
        progress: u32,
        status: TaskStatus,
        message: Option<&str>,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::TaskProgress(TaskProgressPayload {
            task_id: task_id.to_string(),
            progress,
            status,
            message: message.map(str::to_string),
        });
        self.stream.append(NewEvent::typed(session_id, payload)?).await
    }

    /// Record `learning.extracted`
    pub async fn extract_learning(
        &self,
        session_id: &str,
        agent_name: &str,
        content: &str,
        category: &str,
        confidence: f64,
    ) -> StreamResult<StreamEvent> {
        let payload = EventPayload::LearningExtracted(LearningPayload {
            content: content.to_string(),
            category: category.to_string(),
            confidence,
            tags: Vec::new(),
        });
        let event = NewEvent::typed(session_id, payload)?.with_agent(agent_name);
        self.stream.append(event).await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StreamConfig;
    use crate::error::StreamError;
    use crate::orchestrator::Orchestrator;
    use crate::types::{EventPayload, EventType, LedgerState, TaskStatus};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open(temp_dir: &TempDir) -> Orchestrator {
        Orchestrator::open(StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_agent_lifecycle_builders() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = open(&temp_dir).await;

        let spawned = orchestrator
            .spawn_agent("s1", "coder", "fix the bug", Some("planner"))
            .await
            .unwrap();
        assert_eq!(spawned.agent.as_deref(), Some("coder"));
        assert_eq!(spawned.metadata.source_agent.as_deref(), Some("planner"));

        let completed = orchestrator
            .complete_agent("s1", "coder", json!({"files": 2}), Some(1500))
            .await
            .unwrap();
        assert_eq!(completed.metadata.duration, Some(1500));

        match completed.typed_payload().unwrap() {
            EventPayload::AgentCompleted(p) => assert_eq!(p.result["files"], 2),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(orchestrator.current_offset(), 2);
    }

    #[tokio::test]
    async fn test_progress_and_learning_validation() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = open(&temp_dir).await;

        orchestrator
            .progress_task("s1", "t1", 40, TaskStatus::InProgress, Some("halfway-ish"))
            .await
            .unwrap();
        let err = orchestrator
            .progress_task("s1", "t1", 140, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));

        let err = orchestrator
            .extract_learning("s1", "coder", "prefer small commits", "process", 1.5)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(orchestrator.current_offset(), 1);
    }

    #[tokio::test]
    async fn test_handoff_links_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = open(&temp_dir).await;

        let snapshot = orchestrator
            .create_context_snapshot("s1", "planner", "plan", vec![], LedgerState::new("planning"))
            .await
            .unwrap();
        let handoff = orchestrator
            .handoff_agent("s1", "planner", "coder", Some("plan ready"), Some(&snapshot))
            .await
            .unwrap();

        assert_eq!(handoff.parent_event_id.as_deref(), Some(snapshot.id.as_str()));
        assert_eq!(handoff.metadata.target_agent.as_deref(), Some("coder"));
        assert_eq!(handoff.payload["snapshotId"], snapshot.payload["snapshotId"]);
        assert_eq!(orchestrator.event_history(Some(EventType::AgentHandoff), None).len(), 1);
    }

    #[tokio::test]
    async fn test_session_builders() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = open(&temp_dir).await;

        let mut details = serde_json::Map::new();
        details.insert("project".into(), json!("event-stream"));
        let created = orchestrator.start_session("s1", details).await.unwrap();
        assert_eq!(created.payload["project"], "event-stream");

        let ended = orchestrator.end_session("s1", Some("done")).await.unwrap();
        assert_eq!(ended.event_type, EventType::SessionEnded);
        assert_eq!(ended.payload["reason"], "done");
    }
}
