//! The append primitive
//!
//! [`EventStream`] ties the durable store to everything that reacts to a new
//! event. One append is, in order:
//!
//! 1. validate and write the line (offset assigned)
//! 2. fold the event into every projection
//! 3. push it onto the recent-history window
//! 4. await every matching listener on the bus
//!
//! The store lock is held for the whole sequence, so appends from
//! concurrent tasks are totally ordered and listeners observe events in
//! offset order. A listener that itself needs to append must spawn that
//! append instead of awaiting it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::bus::SubscriptionBus;
use crate::error::StreamResult;
use crate::event_store::{EventStore, OffsetTracker, StatsCollector, StreamStats};
use crate::history::EventHistory;
use crate::projection::Projection;
use crate::recovery::{RecoveryEngine, RecoveryReport};
use crate::types::{EventType, NewEvent, StreamEvent};

/// Store, projections, history and bus behind a single ordered append path
pub struct EventStream {
    store: AsyncMutex<EventStore>,
    offsets: Arc<OffsetTracker>,
    projections: Vec<Arc<dyn Projection>>,
    history: Mutex<EventHistory>,
    bus: SubscriptionBus,
}

impl EventStream {
    pub fn new(
        store: EventStore,
        history_capacity: usize,
        projections: Vec<Arc<dyn Projection>>,
    ) -> Self {
        Self {
            offsets: store.offsets(),
            store: AsyncMutex::new(store),
            projections,
            history: Mutex::new(EventHistory::new(history_capacity)),
            bus: SubscriptionBus::new(),
        }
    }

    /// Durably append an event and notify projections and listeners
    pub async fn append(&self, event: NewEvent) -> StreamResult<StreamEvent> {
        let mut store = self.store.lock().await;
        let event = store.append(event)?;

        for projection in &self.projections {
            projection.apply(&event);
        }
        self.history.lock().push(event.clone());

        let report = self.bus.dispatch(&event).await;
        if report.failed > 0 {
            warn!(
                offset = event.offset(),
                failed = report.failed,
                delivered = report.delivered,
                "some listeners failed"
            );
        } else {
            debug!(offset = event.offset(), delivered = report.delivered, "event dispatched");
        }

        drop(store);
        Ok(event)
    }

    /// Rebuild projections and history from the log
    ///
    /// Waits for in-flight appends; appends issued meanwhile wait for it.
    pub async fn recover(&self) -> StreamResult<RecoveryReport> {
        let store = self.store.lock().await;
        let mut history = self.history.lock();
        RecoveryEngine::new(&store, &self.projections).run(&mut history)
    }

    /// Highest offset assigned so far; 0 before the first append
    pub fn current_offset(&self) -> u64 {
        self.offsets.current()
    }

    pub fn bus(&self) -> &SubscriptionBus {
        &self.bus
    }

    /// Most recent events first
    pub fn recent(&self, event_type: Option<EventType>, limit: Option<usize>) -> Vec<StreamEvent> {
        self.history.lock().recent(event_type, limit)
    }

    /// Scan every segment for storage statistics
    pub async fn stats(&self) -> StreamResult<StreamStats> {
        let store = self.store.lock().await;
        StatsCollector::new(&store).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventFilter;
    use crate::config::StreamConfig;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counter {
        seen: AtomicUsize,
    }

    impl Projection for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }
        fn apply(&self, _event: &StreamEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        fn reset(&self) {
            self.seen.store(0, Ordering::SeqCst);
        }
    }

    fn create_stream(counter: Arc<Counter>) -> (Arc<EventStream>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false);
        let store = EventStore::open(config).unwrap();
        (Arc::new(EventStream::new(store, 100, vec![counter])), temp_dir)
    }

    #[tokio::test]
    async fn test_append_updates_projection_and_history() {
        let counter = Arc::new(Counter::default());
        let (stream, _temp_dir) = create_stream(Arc::clone(&counter));

        stream
            .append(NewEvent::new(EventType::SessionCreated, "s1", json!({})))
            .await
            .unwrap();

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
        assert_eq!(stream.current_offset(), 1);
        assert_eq!(stream.recent(None, None).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_touches_nothing() {
        let counter = Arc::new(Counter::default());
        let (stream, _temp_dir) = create_stream(Arc::clone(&counter));

        let result = stream
            .append(NewEvent::new(EventType::TaskProgress, "s1", json!({"taskId": "t", "progress": 101})))
            .await;

        assert!(result.is_err());
        assert_eq!(counter.seen.load(Ordering::SeqCst), 0);
        assert!(stream.recent(None, None).is_empty());
        assert_eq!(stream.current_offset(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_delivered_in_offset_order() {
        let counter = Arc::new(Counter::default());
        let (stream, _temp_dir) = create_stream(counter);

        let delivered = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        stream.bus().subscribe(EventFilter::All, move |e: StreamEvent| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(e.offset());
                Ok(())
            }
        });

        let mut handles = Vec::new();
        for i in 0..20 {
            let stream = Arc::clone(&stream);
            handles.push(tokio::spawn(async move {
                stream
                    .append(NewEvent::new(EventType::SessionCreated, format!("s{}", i), json!({})))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*delivered.lock(), (1..=20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_recover_is_idempotent() {
        let counter = Arc::new(Counter::default());
        let (stream, _temp_dir) = create_stream(Arc::clone(&counter));
        for _ in 0..3 {
            stream
                .append(NewEvent::new(EventType::SessionCreated, "s1", json!({})))
                .await
                .unwrap();
        }

        let first = stream.recover().await.unwrap();
        let second = stream.recover().await.unwrap();

        assert_eq!(first.events_replayed, 3);
        assert_eq!(second.events_replayed, 3);
        assert_eq!(counter.seen.load(Ordering::SeqCst), 3);
        assert_eq!(stream.current_offset(), 3);
        assert_eq!(stream.recent(None, None).len(), 3);
    }
}
