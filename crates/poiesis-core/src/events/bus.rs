//! Publish/subscribe fan-out with bounded history.
//!
//! # Reentrancy
//!
//! `emit` copies the subscriber list for its event type and releases the lock
//! before invoking anything, so a handler may call `on`, `emit`, `clear`, or
//! unsubscribe on the same bus. Handlers registered during an emit are not
//! invoked by it; handlers removed during an emit are skipped from that point.

use super::{EventPayload, HistoryBuffer};
use crate::config::ClientDefaults;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error};

type Handler<T> = dyn Fn(EventPayload<T>) + Send + Sync;

struct Subscriber<T> {
    id: u64,
    active: AtomicBool,
    handler: Box<Handler<T>>,
}

impl<T> Subscriber<T> {
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

type SubscriberMap<T> = HashMap<String, Vec<Arc<Subscriber<T>>>>;

struct BusInner<T> {
    subscribers: Mutex<SubscriberMap<T>>,
    history: Mutex<HistoryBuffer<T>>,
    next_subscriber_id: AtomicU64,
    next_sequence: AtomicU64,
    handler_failures: AtomicU64,
}

impl<T> BusInner<T> {
    fn subscribers(&self) -> MutexGuard<'_, SubscriberMap<T>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, HistoryBuffer<T>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removal hook a [`SubscriptionHandle`] calls without knowing the payload type.
trait Detach: Send + Sync {
    fn detach(&self, event_type: &str, subscriber_id: u64) -> bool;
}

impl<T: Send> Detach for BusInner<T> {
    fn detach(&self, event_type: &str, subscriber_id: u64) -> bool {
        let mut subscribers = self.subscribers();
        let Some(list) = subscribers.get_mut(event_type) else {
            return false;
        };
        let Some(index) = list.iter().position(|s| s.id == subscriber_id) else {
            return false;
        };

        let removed = list.remove(index);
        removed.deactivate();
        if list.is_empty() {
            subscribers.remove(event_type);
        }
        true
    }
}

/// Capability returned by [`EventBus::on`] that removes exactly one handler.
///
/// Dropping the handle does not unsubscribe.
pub struct SubscriptionHandle {
    bus: Weak<dyn Detach>,
    event_type: String,
    subscriber_id: u64,
}

impl SubscriptionHandle {
    /// Remove the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.detach(&self.event_type, self.subscriber_id) {
                debug!("Unsubscribed handler {} from '{}'", self.subscriber_id, self.event_type);
            }
        }
    }

    /// Event type this handle was registered for.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("event_type", &self.event_type)
            .field("subscriber_id", &self.subscriber_id)
            .finish()
    }
}

/// Typed event bus for client-side event distribution.
///
/// Cloning the bus yields another handle to the same subscribers and history.
pub struct EventBus<T = serde_json::Value> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(ClientDefaults::MAX_HISTORY)
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("registered_types", &self.inner.subscribers().len())
            .field("history_len", &self.inner.history().len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus that keeps at most `max_history` payloads.
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                history: Mutex::new(HistoryBuffer::new(max_history)),
                next_subscriber_id: AtomicU64::new(1),
                next_sequence: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to events of a specific type.
    ///
    /// Handlers for one type run in registration order.
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(EventPayload<T>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let subscriber_id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id: subscriber_id,
            active: AtomicBool::new(true),
            handler: Box::new(handler),
        });

        self.inner
            .subscribers()
            .entry(event_type.clone())
            .or_default()
            .push(subscriber);

        let inner: Arc<dyn Detach> = self.inner.clone();
        SubscriptionHandle {
            bus: Arc::downgrade(&inner),
            event_type,
            subscriber_id,
        }
    }

    /// Emit an event to every handler subscribed to `event_type`.
    ///
    /// The payload is appended to history first. `source` defaults to
    /// `"system"`. Returns the number of handlers invoked. A handler that
    /// panics is logged and counted; the remaining handlers still run.
    pub fn emit(&self, event_type: &str, data: T, source: Option<&str>) -> usize {
        let snapshot: Vec<Arc<Subscriber<T>>> = self
            .inner
            .subscribers()
            .get(event_type)
            .cloned()
            .unwrap_or_default();

        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        let payload = EventPayload::new(
            event_type,
            data,
            source.unwrap_or(ClientDefaults::DEFAULT_EVENT_SOURCE),
            sequence,
        );
        self.inner.history().push(payload.clone());

        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.is_active() {
                continue;
            }
            delivered += 1;

            let copy = payload.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(copy)));
            if let Err(panic) = outcome {
                self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Handler {} for '{}' panicked: {}",
                    subscriber.id,
                    event_type,
                    panic_message(panic.as_ref())
                );
            }
        }
        delivered
    }

    /// Stored payloads in emission order, optionally filtered by type.
    pub fn history(&self, event_type: Option<&str>) -> Vec<EventPayload<T>> {
        self.inner.history().snapshot(event_type)
    }

    /// Remove all handlers for `event_type`, or every handler when `None`.
    ///
    /// History is left untouched.
    pub fn clear(&self, event_type: Option<&str>) {
        let removed: Vec<Arc<Subscriber<T>>> = {
            let mut subscribers = self.inner.subscribers();
            match event_type {
                Some(event_type) => subscribers.remove(event_type).unwrap_or_default(),
                None => subscribers.drain().flat_map(|(_, list)| list).collect(),
            }
        };
        for subscriber in &removed {
            subscriber.deactivate();
        }
    }

    /// Number of event types with at least one handler.
    pub fn registered_types(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Number of handlers registered for `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .subscribers()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Configured history capacity.
    pub fn max_history(&self) -> usize {
        self.inner.history().capacity()
    }

    /// Drop stored history. Subscribers are left untouched.
    pub fn clear_history(&self) {
        self.inner.history().clear();
    }

    /// Number of handler invocations that panicked.
    pub fn handler_failures(&self) -> u64 {
        self.inner.handler_failures.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder<T: Send + 'static>() -> Arc<StdMutex<Vec<T>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    #[test]
    fn test_delivers_events_to_subscribers() {
        let bus: EventBus<String> = EventBus::new(100);
        let received = recorder();
        let sink = received.clone();
        bus.on("test", move |payload| sink.lock().unwrap().push(payload.data));

        let delivered = bus.emit("test", "hello".to_string(), None);

        assert_eq!(delivered, 1);
        assert_eq!(*received.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus: EventBus<i32> = EventBus::new(100);
        let received = recorder();
        let sink = received.clone();
        let handle = bus.on("count", move |p| sink.lock().unwrap().push(p.data));

        bus.emit("count", 1, None);
        handle.unsubscribe();
        bus.emit("count", 2, None);

        assert_eq!(*received.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_identity_based() {
        let bus: EventBus<i32> = EventBus::new(10);
        let received = recorder();

        let first_sink = received.clone();
        let first = bus.on("n", move |_| first_sink.lock().unwrap().push("first"));
        let second_sink = received.clone();
        let _second = bus.on("n", move |_| second_sink.lock().unwrap().push("second"));

        assert_eq!(first.event_type(), "n");
        first.unsubscribe();
        first.unsubscribe();

        assert_eq!(bus.subscriber_count("n"), 1);
        bus.emit("n", 0, None);
        assert_eq!(*received.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus: EventBus<i32> = EventBus::new(10);
        let order = recorder();
        for label in ["a", "b", "c"] {
            let sink = order.clone();
            bus.on("e", move |_| sink.lock().unwrap().push(label));
        }

        assert_eq!(bus.emit("e", 0, None), 3);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_emit_without_subscribers_still_records_history() {
        let bus: EventBus<i32> = EventBus::new(10);
        assert_eq!(bus.emit("lonely", 5, Some("tests")), 0);

        let history = bus.history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, "tests");
        assert_eq!(history[0].event_type, "lonely");
    }

    #[test]
    fn test_default_source_is_system() {
        let bus: EventBus<i32> = EventBus::new(10);
        bus.emit("a", 1, None);
        assert_eq!(bus.history(None)[0].source, "system");
    }

    #[test]
    fn test_maintains_event_history() {
        let bus: EventBus<i32> = EventBus::new(100);
        bus.emit("a", 1, None);
        bus.emit("b", 2, None);
        bus.emit("a", 3, None);

        assert_eq!(bus.history(Some("a")).len(), 2);
        assert_eq!(bus.history(None).len(), 3);
        let sequences: Vec<u64> = bus.history(None).iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_respects_max_history() {
        let bus: EventBus<i32> = EventBus::new(3);
        for n in 1..=4 {
            bus.emit("x", n, None);
        }

        let data: Vec<i32> = bus.history(None).into_iter().map(|p| p.data).collect();
        assert_eq!(data, vec![2, 3, 4]);
        assert!(bus.history(Some("y")).is_empty());
    }

    #[test]
    fn test_clear_history_keeps_subscribers() {
        let bus: EventBus<i32> = EventBus::new(5);
        let received = recorder();
        let sink = received.clone();
        bus.on("x", move |p| sink.lock().unwrap().push(p.data));
        bus.emit("x", 1, None);
        bus.emit("x", 2, None);

        bus.clear_history();
        assert!(bus.history(None).is_empty());
        assert_eq!(bus.max_history(), 5);

        bus.emit("x", 3, None);
        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(bus.history(None).len(), 1);
    }

    #[test]
    fn test_clear_handlers() {
        let bus: EventBus<i32> = EventBus::new(10);
        bus.on("a", |_| {});
        bus.on("b", |_| {});
        assert_eq!(bus.registered_types(), 2);

        bus.clear(Some("a"));
        assert_eq!(bus.registered_types(), 1);

        bus.emit("b", 1, None);
        bus.clear(None);
        assert_eq!(bus.registered_types(), 0);
        assert_eq!(bus.history(None).len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus: EventBus<i32> = EventBus::new(10);
        let received = recorder();
        bus.on("e", |_| panic!("handler exploded"));
        let sink = received.clone();
        bus.on("e", move |p| sink.lock().unwrap().push(p.data));

        let delivered = bus.emit("e", 7, None);

        assert_eq!(delivered, 2);
        assert_eq!(*received.lock().unwrap(), vec![7]);
        assert_eq!(bus.handler_failures(), 1);
        assert_eq!(bus.history(None).len(), 1);
    }

    #[test]
    fn test_mutating_received_payload_does_not_touch_history() {
        let bus: EventBus<Vec<i32>> = EventBus::new(10);
        bus.on("v", |mut payload| payload.data.push(99));
        bus.on("v", |payload| assert_eq!(payload.data, vec![1]));

        bus.emit("v", vec![1], None);

        assert_eq!(bus.history(None)[0].data, vec![1]);
    }

    #[test]
    fn test_handler_added_during_emit_is_not_invoked() {
        let bus: EventBus<i32> = EventBus::new(10);
        let late_calls = Arc::new(AtomicU64::new(0));

        let reentrant_bus = bus.clone();
        let counter = late_calls.clone();
        bus.on("e", move |_| {
            let counter = counter.clone();
            reentrant_bus.on("e", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(bus.emit("e", 1, None), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count("e"), 2);
    }

    #[test]
    fn test_handler_removed_during_emit_is_skipped() {
        let bus: EventBus<i32> = EventBus::new(10);
        let received = recorder();
        let victim: Arc<StdMutex<Option<SubscriptionHandle>>> = Arc::new(StdMutex::new(None));

        let slot = victim.clone();
        bus.on("e", move |_| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.unsubscribe();
            }
        });
        let sink = received.clone();
        let handle = bus.on("e", move |p| sink.lock().unwrap().push(p.data));
        *victim.lock().unwrap() = Some(handle);

        assert_eq!(bus.emit("e", 1, None), 1);
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reentrant_emit_from_handler() {
        let bus: EventBus<i32> = EventBus::new(10);
        let echo_bus = bus.clone();
        bus.on("ping", move |p| {
            echo_bus.emit("pong", p.data + 1, Some("echo"));
        });

        bus.emit("ping", 1, None);

        let pongs = bus.history(Some("pong"));
        assert_eq!(pongs.len(), 1);
        assert_eq!(pongs[0].data, 2);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped_is_noop() {
        let bus: EventBus<i32> = EventBus::new(10);
        let handle = bus.on("e", |_| {});
        drop(bus);
        handle.unsubscribe();
    }
}
