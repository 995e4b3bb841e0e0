// pml-bus/src/bus.rs
// ============================================================================
// Module: Gateway Event Bus
// Description: Typed in-process pub/sub with bounded subscriber queues.
// Purpose: Fan out events without ever stalling or failing producers.
// Dependencies: pml-core, tokio
// ============================================================================

//! ## Overview
//! Publication is non-blocking and infallible: each subscriber owns a bounded
//! ring that sheds its oldest entry on overflow, with the shed count exposed
//! for tests and metrics. Events deliver to one subscriber in emission order;
//! there is no global order across subscribers. Handler failures are counted
//! and never affect other subscribers. Peer-originated events are re-injected
//! with their origin preserved so they never loop back out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use pml_core::EventEnvelope;
use pml_core::EventKind;
use pml_core::EventPublisher;
use pml_core::GatewayEvent;
use pml_core::Timestamp;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::fanout::PeerFanout;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Receive every event (the `"*"` subscription).
    All,
    /// Receive one event kind.
    Kind(EventKind),
}

impl EventFilter {
    /// Returns true when the filter accepts the event.
    #[must_use]
    pub fn accepts(self, event: &GatewayEvent) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => event.kind() == kind,
        }
    }
}

// ============================================================================
// SECTION: Subscriber State
// ============================================================================

/// Shared per-subscriber queue state.
#[derive(Debug)]
struct SubscriberState {
    /// Bounded event ring.
    queue: Mutex<VecDeque<GatewayEvent>>,
    /// Wakeup for the consumer.
    notify: Notify,
    /// Events shed on overflow.
    dropped: AtomicU64,
}

/// Registered subscriber entry.
struct Registration {
    /// Subscriber identity.
    id: u64,
    /// Subscription filter.
    filter: EventFilter,
    /// Queue state shared with the consumer handle.
    state: Arc<SubscriberState>,
}

/// Shared bus internals.
struct BusInner {
    /// Origin tag stamped on outgoing envelopes.
    origin: String,
    /// Registered subscribers.
    subscribers: Mutex<Vec<Registration>>,
    /// Next subscriber identity.
    next_id: AtomicU64,
    /// Per-subscriber queue capacity.
    capacity: usize,
    /// Optional peer fan-out.
    fanout: Mutex<Option<Arc<dyn PeerFanout>>>,
}

// ============================================================================
// SECTION: Event Bus
// ============================================================================

/// Process-wide typed event bus.
#[derive(Clone)]
pub struct EventBus {
    /// Shared internals.
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with the provided origin tag.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_capacity(origin, SUBSCRIBER_QUEUE_CAPACITY)
    }

    /// Creates a bus with a custom per-subscriber queue capacity.
    #[must_use]
    pub fn with_capacity(origin: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                origin: origin.into(),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                fanout: Mutex::new(None),
            }),
        }
    }

    /// Returns the bus origin tag.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Attaches the peer fan-out used for cross-process delivery.
    pub fn set_fanout(&self, fanout: Arc<dyn PeerFanout>) {
        if let Ok(mut guard) = self.inner.fanout.lock() {
            *guard = Some(fanout);
        }
    }

    /// Emits an event to all subscribers and the peer fan-out.
    ///
    /// Never blocks and never fails; slow subscribers shed their oldest
    /// queued event.
    pub fn emit(&self, event: GatewayEvent) {
        self.deliver_local(&event);
        let fanout = self.inner.fanout.lock().ok().and_then(|guard| guard.clone());
        if let Some(fanout) = fanout {
            fanout.send(&EventEnvelope {
                event,
                origin: self.inner.origin.clone(),
                emitted_at: Timestamp::now(),
            });
        }
    }

    /// Re-injects a peer envelope into the local bus.
    ///
    /// Envelopes originating from this process are ignored (loop
    /// prevention), and peer events are never re-forwarded.
    pub fn inject(&self, envelope: &EventEnvelope) {
        if envelope.origin == self.inner.origin {
            return;
        }
        self.deliver_local(&envelope.event);
    }

    /// Delivers an event to matching local subscribers.
    fn deliver_local(&self, event: &GatewayEvent) {
        let Ok(subscribers) = self.inner.subscribers.lock() else {
            return;
        };
        for registration in subscribers.iter() {
            if !registration.filter.accepts(event) {
                continue;
            }
            if let Ok(mut queue) = registration.state.queue.lock() {
                if queue.len() >= self.inner.capacity {
                    queue.pop_front();
                    registration.state.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(event.clone());
            }
            registration.state.notify.notify_one();
        }
    }

    /// Subscribes with a filter; dropping the subscription unregisters it.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriberState {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(Registration {
                id,
                filter,
                state: Arc::clone(&state),
            });
        }
        Subscription {
            id,
            state,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Spawns a drain task invoking a handler per event.
    ///
    /// Handler failures increment the handle's error counter and never
    /// affect other subscribers. Dropping the handle stops the task and
    /// unregisters the subscription.
    #[must_use]
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> HandlerHandle
    where
        F: Fn(GatewayEvent) -> Result<(), String> + Send + 'static,
    {
        let mut subscription = self.subscribe(filter);
        let errors = Arc::new(AtomicU64::new(0));
        let errors_task = Arc::clone(&errors);
        let join = tokio::spawn(async move {
            loop {
                let event = subscription.recv().await;
                if handler(event).is_err() {
                    errors_task.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        HandlerHandle {
            join,
            errors,
        }
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: GatewayEvent) {
        self.emit(event);
    }
}

// ============================================================================
// SECTION: Subscription
// ============================================================================

/// Consumer handle for a subscription.
pub struct Subscription {
    /// Subscriber identity.
    id: u64,
    /// Queue state shared with the bus.
    state: Arc<SubscriberState>,
    /// Owning bus, for unregistration on drop.
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Receives the next event, waiting if the queue is empty.
    pub async fn recv(&mut self) -> GatewayEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.state.notify.notified().await;
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.state.queue.lock().ok()?.pop_front()
    }

    /// Returns the number of events shed on overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade()
            && let Ok(mut subscribers) = inner.subscribers.lock()
        {
            subscribers.retain(|registration| registration.id != self.id);
        }
    }
}

// ============================================================================
// SECTION: Handler Handle
// ============================================================================

/// Handle to a spawned event handler.
pub struct HandlerHandle {
    /// Drain task.
    join: JoinHandle<()>,
    /// Handler failure count.
    errors: Arc<AtomicU64>,
}

impl HandlerHandle {
    /// Returns the number of handler failures.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Stops the drain task and unregisters the subscription.
    pub fn unsubscribe(self) {
        self.join.abort();
    }
}

impl Drop for HandlerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}
