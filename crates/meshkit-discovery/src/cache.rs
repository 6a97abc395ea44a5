//! The endpoint cache: instance identifiers in, live endpoints out.
//!
//! [`EndpointCache::apply`] folds a stream of [`Event`]s into a set of
//! factory-built endpoints, and [`Endpointer`] wires a cache to an
//! [`Instancer`] with a background task. Readers only ever touch an
//! atomically swapped snapshot, so lookups never wait on factory work.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use meshkit_core::Endpoint;

use crate::event::{DiscoveryError, Event};
use crate::factory::{Closer, Factory};
use crate::instancer::{Instancer, SubscriptionId};

struct CacheEntry<Req, Res> {
    endpoint: Endpoint<Req, Res>,
    closer: Option<Closer>,
}

struct CacheInner<Req, Res> {
    /// Live entries, ordered by identifier so the published snapshot has a
    /// stable order.
    entries: BTreeMap<String, CacheEntry<Req, Res>>,
    /// Consecutive factory failures per identifier, for log rate limiting.
    factory_failures: HashMap<String, u32>,
}

/// Maintains one live [`Endpoint`] per instance in the most recent
/// successful event.
///
/// State machine per applied event:
///
/// * identifiers present before and after survive untouched (the factory is
///   not re-invoked),
/// * new identifiers go through the factory; a factory failure is logged
///   and the instance skipped,
/// * departed identifiers have their closer invoked exactly once,
/// * a failure event changes nothing except [`last_error`](Self::last_error);
///   the last known-good snapshot keeps serving.
///
/// `apply` is serialised internally; readers take a cheap snapshot clone and
/// never contend with factory invocations.
pub struct EndpointCache<Req, Res> {
    factory: Factory<Req, Res>,
    inner: Mutex<CacheInner<Req, Res>>,
    snapshot: RwLock<Arc<Vec<Endpoint<Req, Res>>>>,
    last_error: Mutex<Option<DiscoveryError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<Req, Res> EndpointCache<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new(factory: Factory<Req, Res>) -> Self {
        Self {
            factory,
            inner: Mutex::new(CacheInner {
                entries: BTreeMap::new(),
                factory_failures: HashMap::new(),
            }),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_error: Mutex::new(None),
        }
    }

    /// Folds one event into the cache and publishes a fresh snapshot.
    pub fn apply(&self, event: &Event) {
        let instances = match event.as_result() {
            Ok(instances) => instances,
            Err(err) => {
                warn!(error = %err, "discovery failure, retaining last known instance set");
                *lock(&self.last_error) = Some(err.clone());
                return;
            }
        };
        *lock(&self.last_error) = None;

        let mut inner = lock(&self.inner);

        for instance in instances {
            if inner.entries.contains_key(instance) {
                continue;
            }
            match (self.factory)(instance) {
                Ok((endpoint, closer)) => {
                    inner.factory_failures.remove(instance);
                    inner.entries.insert(
                        instance.clone(),
                        CacheEntry {
                            endpoint,
                            closer: Some(closer),
                        },
                    );
                    debug!(instance = %instance, "instance added");
                }
                Err(err) => {
                    let failures = inner
                        .factory_failures
                        .entry(instance.clone())
                        .or_insert(0);
                    *failures += 1;
                    // First failure per identifier at warn; repeats at debug
                    // until the factory recovers or the instance departs.
                    if *failures == 1 {
                        warn!(instance = %instance, error = %err, "endpoint factory failed, skipping instance");
                    } else {
                        debug!(instance = %instance, error = %err, failures = *failures, "endpoint factory still failing");
                    }
                }
            }
        }

        let keep: HashSet<&str> = instances.iter().map(String::as_str).collect();
        let departed: Vec<String> = inner
            .entries
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for instance in departed {
            if let Some(mut entry) = inner.entries.remove(&instance) {
                if let Some(closer) = entry.closer.take() {
                    closer();
                }
                debug!(instance = %instance, "instance removed");
            }
        }
        inner.factory_failures.retain(|id, _| keep.contains(id.as_str()));

        let snapshot: Vec<Endpoint<Req, Res>> =
            inner.entries.values().map(|e| e.endpoint.clone()).collect();
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::new(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(snapshot),
        }
    }

    /// The current endpoint set, in identifier order. Cheap: clones an `Arc`.
    pub fn endpoints(&self) -> Arc<Vec<Endpoint<Req, Res>>> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// The failure carried by the most recent event, if it was a failure.
    pub fn last_error(&self) -> Option<DiscoveryError> {
        lock(&self.last_error).clone()
    }
}

/// Glue between an [`Instancer`] and an [`EndpointCache`]: registers a sink
/// and drives `apply` from a background task.
pub struct Endpointer<Req, Res> {
    cache: Arc<EndpointCache<Req, Res>>,
    instancer: Arc<dyn Instancer>,
    subscription: SubscriptionId,
    stopped: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<Req, Res> Endpointer<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Subscribes to `instancer` and starts applying its events. The initial
    /// event is processed asynchronously; a cache built over a
    /// [`StaticInstancer`](crate::instancer::StaticInstancer) is populated
    /// shortly after construction, not during it.
    pub fn new(instancer: Arc<dyn Instancer>, factory: Factory<Req, Res>) -> Self {
        let cache = Arc::new(EndpointCache::new(factory));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = instancer.register(tx);
        let task = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    cache.apply(&event);
                }
                debug!("endpointer event stream closed");
            })
        };
        Self {
            cache,
            instancer,
            subscription,
            stopped: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn cache(&self) -> Arc<EndpointCache<Req, Res>> {
        Arc::clone(&self.cache)
    }

    pub fn endpoints(&self) -> Arc<Vec<Endpoint<Req, Res>>> {
        self.cache.endpoints()
    }
}

// Unbounded so Drop (also unbounded) can call it.
impl<Req, Res> Endpointer<Req, Res> {
    /// Unsubscribes from the instancer. The background task drains what it
    /// already received and exits. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.instancer.deregister(self.subscription);
        // Sink dropped by the instancer; the task exits when the channel
        // drains. Nothing to join synchronously.
        lock(&self.task).take();
    }
}

impl<Req, Res> Drop for Endpointer<Req, Res> {
    fn drop(&mut self) {
        self.stop();
    }
}
