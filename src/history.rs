//! Bounded in-memory window of recent events

use std::collections::VecDeque;

use crate::types::{EventType, StreamEvent};

/// Ring buffer keeping the most recent `capacity` events
#[derive(Debug, Clone)]
pub struct EventHistory {
    events: VecDeque<StreamEvent>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Record an event, evicting the oldest one when full
    pub fn push(&mut self, event: StreamEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Most recent first, optionally filtered by type and truncated to `limit`
    pub fn recent(&self, event_type: Option<EventType>, limit: Option<usize>) -> Vec<StreamEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewEvent;
    use chrono::Utc;
    use serde_json::json;

    fn event(event_type: EventType, offset: u64) -> StreamEvent {
        NewEvent::new(event_type, "s1", json!({})).into_event(format!("e{}", offset), Utc::now(), offset)
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = EventHistory::new(3);
        for offset in 1..=5 {
            history.push(event(EventType::SessionCreated, offset));
        }

        let offsets: Vec<u64> = history.recent(None, None).iter().map(|e| e.offset()).collect();
        assert_eq!(offsets, vec![5, 4, 3]);
    }

    #[test]
    fn test_filter_and_limit() {
        let mut history = EventHistory::new(10);
        history.push(event(EventType::SessionCreated, 1));
        history.push(event(EventType::TaskProgress, 2));
        history.push(event(EventType::TaskProgress, 3));
        history.push(event(EventType::SessionEnded, 4));

        let progress = history.recent(Some(EventType::TaskProgress), None);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].offset(), 3);

        let latest = history.recent(None, Some(1));
        assert_eq!(latest[0].offset(), 4);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = EventHistory::new(0);
        history.push(event(EventType::SessionCreated, 1));
        assert!(history.is_empty());
    }
}
