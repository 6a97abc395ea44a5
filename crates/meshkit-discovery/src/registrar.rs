//! The write side of service discovery: advertising this process.
//!
//! A [`Registrar`] publishes one instance's liveness to a discovery
//! collaborator and withdraws it on shutdown. [`TtlRegistrar`] keeps a
//! lease-style advertisement alive by re-registering on a fraction of the
//! TTL; [`MemoryRegistry`] is the in-process backend used by tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::DiscoveryError;

/// What gets advertised: the instance identifier, free-form tags, and the
/// lease TTL a backend should expire the entry after.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub instance: String,
    pub tags: Vec<String>,
    pub ttl: Duration,
}

impl Registration {
    pub fn new(instance: impl Into<String>, ttl: Duration) -> Self {
        Self {
            instance: instance.into(),
            tags: Vec::new(),
            ttl,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Storage a registrar publishes into. Register is also the refresh
/// operation: re-registering an existing instance renews its lease.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn register(&self, registration: &Registration) -> Result<(), DiscoveryError>;
    async fn deregister(&self, instance: &str) -> Result<(), DiscoveryError>;
}

/// Publishes and withdraws one instance's advertisement. Both operations are
/// idempotent; `register` returns backend errors without retrying
/// internally.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self) -> Result<(), DiscoveryError>;
    async fn deregister(&self) -> Result<(), DiscoveryError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A [`Registrar`] for lease-style backends: after a successful register it
/// spawns a refresher that re-registers every `ttl / 3`, logging and
/// continuing on individual refresh failures. Deregister stops the refresher
/// before withdrawing the advertisement.
pub struct TtlRegistrar<B> {
    backend: Arc<B>,
    registration: Registration,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<B> TtlRegistrar<B>
where
    B: RegistryBackend + 'static,
{
    pub fn new(backend: Arc<B>, registration: Registration) -> Self {
        Self {
            backend,
            registration,
            refresher: Mutex::new(None),
        }
    }

    fn spawn_refresher(&self) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let registration = self.registration.clone();
        let period = (registration.ttl / 3).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // immediate first tick; registration just happened
            loop {
                interval.tick().await;
                if let Err(err) = backend.register(&registration).await {
                    warn!(instance = %registration.instance, error = %err, "ttl refresh failed");
                } else {
                    debug!(instance = %registration.instance, "ttl refreshed");
                }
            }
        })
    }
}

#[async_trait]
impl<B> Registrar for TtlRegistrar<B>
where
    B: RegistryBackend + 'static,
{
    async fn register(&self) -> Result<(), DiscoveryError> {
        if lock(&self.refresher).is_some() {
            // Already registered; treat as a manual refresh.
            return self.backend.register(&self.registration).await;
        }
        self.backend.register(&self.registration).await?;
        let handle = self.spawn_refresher();
        let mut refresher = lock(&self.refresher);
        if refresher.is_some() {
            // Lost a race with a concurrent register; keep the first loop.
            handle.abort();
        } else {
            *refresher = Some(handle);
        }
        Ok(())
    }

    async fn deregister(&self) -> Result<(), DiscoveryError> {
        let handle = lock(&self.refresher).take();
        match handle {
            Some(handle) => {
                handle.abort();
                self.backend.deregister(&self.registration.instance).await
            }
            None => Ok(()),
        }
    }
}

impl<B> Drop for TtlRegistrar<B> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.refresher).take() {
            handle.abort();
        }
    }
}

/// In-process [`RegistryBackend`].
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<String, Registration>>,
    register_calls: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Registration> {
        lock(&self.entries).values().cloned().collect()
    }

    pub fn contains(&self, instance: &str) -> bool {
        lock(&self.entries).contains_key(instance)
    }

    /// Total register invocations, including refreshes. For tests and
    /// monitoring.
    pub fn register_calls(&self) -> u64 {
        self.register_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).insert(registration.instance.clone(), registration.clone());
        Ok(())
    }

    async fn deregister(&self, instance: &str) -> Result<(), DiscoveryError> {
        lock(&self.entries).remove(instance);
        Ok(())
    }
}
