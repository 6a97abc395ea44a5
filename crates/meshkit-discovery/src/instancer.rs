//! Sources of instance-set events.
//!
//! An [`Instancer`] is the read side of service discovery: it delivers
//! [`Event`]s (full snapshots of a service's instance set) to registered
//! sinks. Backend adapters (DNS, registry clients) are written against
//! [`SubjectInstancer`]; [`StaticInstancer`] covers fixed fleets and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{DiscoveryError, Event};

/// Delivery target for events. Unbounded so instancers never block on slow
/// consumers; a dropped receiver simply unsubscribes itself.
pub type EventSink = mpsc::UnboundedSender<Event>;

/// Handle identifying one registration with an instancer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The read side of service discovery.
///
/// Registering a sink delivers the current event immediately, then every
/// subsequent event in emission order. Ordering holds per sink; nothing is
/// guaranteed across sinks.
pub trait Instancer: Send + Sync {
    /// Subscribes `sink`. The current event is delivered before this
    /// returns a handle.
    fn register(&self, sink: EventSink) -> SubscriptionId;

    /// Removes a subscription. Idempotent; no events are delivered to the
    /// sink after this returns.
    fn deregister(&self, id: SubscriptionId);

    /// Releases backend resources. Registered sinks receive no terminal
    /// event; they simply stop receiving.
    fn stop(&self);
}

/// An instancer over a fixed instance set. Every registration receives the
/// set once and nothing further.
pub struct StaticInstancer {
    event: Event,
    next_id: AtomicU64,
}

impl StaticInstancer {
    pub fn new<I, S>(instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event: Event::instances(instances),
            next_id: AtomicU64::new(0),
        }
    }
}

impl Instancer for StaticInstancer {
    fn register(&self, sink: EventSink) -> SubscriptionId {
        let _ = sink.send(self.event.clone());
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn deregister(&self, _id: SubscriptionId) {}

    fn stop(&self) {}
}

struct SubjectState {
    current: Event,
    sinks: HashMap<SubscriptionId, EventSink>,
    next_id: u64,
    stopped: bool,
}

/// A manually driven instancer: callers push the instance set with
/// [`update`](SubjectInstancer::update) or report backend trouble with
/// [`fail`](SubjectInstancer::fail), and every registered sink sees the
/// resulting events in order.
///
/// Discovery adapters wrap one of these: their watch loop translates backend
/// notifications into `update`/`fail` calls. Each event carries the full
/// snapshot; identical consecutive snapshots are still forwarded, consumers
/// coalesce if they care.
pub struct SubjectInstancer {
    state: Mutex<SubjectState>,
}

impl SubjectInstancer {
    /// Starts with an empty instance set.
    pub fn new() -> Self {
        Self::with_initial(Event::instances(Vec::<String>::new()))
    }

    pub fn with_initial(event: Event) -> Self {
        Self {
            state: Mutex::new(SubjectState {
                current: event,
                sinks: HashMap::new(),
                next_id: 0,
                stopped: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubjectState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publishes a new instance set to all sinks.
    pub fn update<I, S>(&self, instances: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broadcast(Event::instances(instances));
    }

    /// Publishes a resolution failure to all sinks.
    pub fn fail(&self, err: DiscoveryError) {
        self.broadcast(Event::failure(err));
    }

    pub fn current(&self) -> Event {
        self.lock().current.clone()
    }

    fn broadcast(&self, event: Event) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.current = event.clone();
        // Sinks whose receiver is gone are dropped on the way through.
        state.sinks.retain(|id, sink| {
            let alive = sink.send(event.clone()).is_ok();
            if !alive {
                debug!(subscription = id.0, "dropping closed event sink");
            }
            alive
        });
    }
}

impl Default for SubjectInstancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Instancer for SubjectInstancer {
    fn register(&self, sink: EventSink) -> SubscriptionId {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        if !state.stopped {
            let _ = sink.send(state.current.clone());
            state.sinks.insert(id, sink);
        }
        id
    }

    fn deregister(&self, id: SubscriptionId) {
        self.lock().sinks.remove(&id);
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.sinks.clear();
    }
}
