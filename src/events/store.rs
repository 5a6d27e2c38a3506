//! Shared append-only event log with synchronous subscribers.
//!
//! The log is single-writer (the loop executor) and multi-reader. Every
//! `append` notifies all current subscribers, in order, before it returns.
//! Handlers must not append to or subscribe on the same log.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use log::warn;
use serde_json::Value;

use super::{Event, EventKind};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    subscribers: Vec<(u64, Handler)>,
    next_subscriber: u64,
}

/// Append-only, strictly ordered store of session events - clone-cheap via Arc.
#[derive(Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Inner>>,
    // Serializes append+notify so subscribers observe the append order.
    delivery: Arc<Mutex<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and deliver it to every subscriber before returning.
    pub fn append(&self, kind: EventKind, payload: Value) -> Event {
        let _delivery = lock(&self.delivery);

        let (event, handlers) = {
            let mut inner = lock(&self.inner);
            let event = Event {
                id: inner.events.len() as u64 + 1,
                kind,
                payload,
                timestamp: Utc::now(),
            };
            inner.events.push(event.clone());
            let handlers: Vec<Handler> = inner.subscribers.iter().map(|(_, h)| h.clone()).collect();
            (event, handlers)
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!("Event subscriber panicked on event {} ({})", event.id, event.kind);
            }
        }

        event
    }

    /// Snapshot of every event appended so far, in append order.
    pub fn get_all(&self) -> Vec<Event> {
        lock(&self.inner).events.clone()
    }

    /// Events appended after the event with the given id.
    pub fn since(&self, id: u64) -> Vec<Event> {
        lock(&self.inner)
            .events
            .iter()
            .filter(|e| e.id > id)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<Event> {
        lock(&self.inner).events.last().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver every future event to `handler`, exactly once, in append order.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        // Waiting on delivery means no append is mid-notification, so the
        // handler sees everything appended after this call returns.
        let _delivery = lock(&self.delivery);
        let mut inner = lock(&self.inner);
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push((id, Arc::new(handler)));

        Subscription {
            id,
            log: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("EventLog")
            .field("events", &inner.events.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

/// Handle returned by [`EventLog::subscribe`].
///
/// Dropping the handle leaves the handler attached; call `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    log: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.log.upgrade() {
            lock(&inner).subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}
