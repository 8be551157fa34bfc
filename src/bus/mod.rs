//! Subscription Bus
//!
//! In-process observer registry notified after an event is durably written.
//! Listeners are keyed by event type, plus a wildcard list, and are invoked
//! one at a time in registration order. A dispatch completes only once every
//! matching listener has completed.
//!
//! # Design
//!
//! Listener failures are contained: an `Err` or a panic is logged and the
//! next listener still runs. Unsubscribing removes the listener from future
//! dispatches; a dispatch already in flight works on its own copy of the
//! matching list.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::types::{EventType, StreamEvent};

/// Error type listeners may return
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for listeners
pub type ListenerResult = Result<(), ListenerError>;

type ListenerFn = dyn Fn(StreamEvent) -> BoxFuture<'static, ListenerResult> + Send + Sync;

/// Which events a listener wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// `*`: every event type
    All,
    Type(EventType),
}

impl EventFilter {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Type(t) => *t == event_type,
        }
    }
}

impl From<EventType> for EventFilter {
    fn from(event_type: EventType) -> Self {
        EventFilter::Type(event_type)
    }
}

impl FromStr for EventFilter {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(EventFilter::All),
            other => other.parse().map(EventFilter::Type),
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::All => f.write_str("*"),
            EventFilter::Type(t) => write!(f, "{}", t),
        }
    }
}

struct Registration {
    id: u64,
    filter: EventFilter,
    listener: Box<ListenerFn>,
}

#[derive(Default)]
struct Registry {
    by_type: HashMap<EventType, Vec<Arc<Registration>>>,
    wildcard: Vec<Arc<Registration>>,
    next_id: u64,
}

impl Registry {
    fn remove(&mut self, id: u64, filter: EventFilter) -> bool {
        let list = match filter {
            EventFilter::All => &mut self.wildcard,
            EventFilter::Type(t) => match self.by_type.get_mut(&t) {
                Some(list) => list,
                None => return false,
            },
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        before != list.len()
    }

    /// Matching registrations in registration order
    fn matching(&self, event_type: EventType) -> Vec<Arc<Registration>> {
        let mut matched: Vec<Arc<Registration>> = self
            .by_type
            .get(&event_type)
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter())
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.id);
        matched
    }

    fn len(&self) -> usize {
        self.wildcard.len() + self.by_type.values().map(Vec::len).sum::<usize>()
    }
}

/// Outcome of dispatching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Observer registry for newly appended events
#[derive(Default)]
pub struct SubscriptionBus {
    registry: Arc<Mutex<Registry>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; multiple listeners per type are allowed
    ///
    /// The returned handle unsubscribes explicitly. Dropping it keeps the
    /// listener registered.
    pub fn subscribe<F, Fut>(&self, filter: impl Into<EventFilter>, listener: F) -> Subscription
    where
        F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let filter = filter.into();
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;

        let registration = Arc::new(Registration {
            id,
            filter,
            listener: Box::new(move |event| listener(event).boxed()),
        });
        match filter {
            EventFilter::All => registry.wildcard.push(registration),
            EventFilter::Type(t) => registry.by_type.entry(t).or_default().push(registration),
        }
        debug!(subscription = id, filter = %filter, "listener subscribed");

        Subscription {
            id,
            filter,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Invoke every matching listener in registration order, awaiting each
    pub(crate) async fn dispatch(&self, event: &StreamEvent) -> DispatchReport {
        let listeners = self.registry.lock().matching(event.event_type);
        let mut report = DispatchReport::default();

        for registration in listeners {
            let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| {
                (registration.listener)(event.clone())
            }));
            let outcome = match invoked {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        subscription = registration.id,
                        filter = %registration.filter,
                        offset = event.offset(),
                        error = %e,
                        "listener failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        subscription = registration.id,
                        filter = %registration.filter,
                        offset = event.offset(),
                        panic = panic_message(panic.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`SubscriptionBus::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    filter: EventFilter,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> EventFilter {
        self.filter
    }

    /// Remove the listener; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.lock().remove(self.id, self.filter);
        if removed {
            debug!(subscription = self.id, "listener unsubscribed");
        }
        removed
    }
}
