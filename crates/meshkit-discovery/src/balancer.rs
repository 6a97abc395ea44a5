//! Endpoint selection policies.
//!
//! A balancer is a pure selection function over the cache's current
//! snapshot: no retries, no timeouts, no outcome tracking. Wrap it with
//! [`retry`](crate::retry::retry) for those.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meshkit_core::{Endpoint, EndpointError, Result};

use crate::cache::EndpointCache;

pub trait Balancer<Req, Res>: Send + Sync {
    /// Picks one endpoint from the current set, or
    /// [`EndpointError::NoEndpoints`] when the set is empty.
    fn endpoint(&self) -> Result<Endpoint<Req, Res>>;
}

/// Cycles through the endpoint set with a wait-free atomic cursor: exactly
/// one pick per call, and concurrent callers land on different endpoints
/// whenever at least two are available.
pub struct RoundRobin<Req, Res> {
    cache: Arc<EndpointCache<Req, Res>>,
    cursor: AtomicUsize,
}

impl<Req, Res> RoundRobin<Req, Res> {
    pub fn new(cache: Arc<EndpointCache<Req, Res>>) -> Self {
        Self {
            cache,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl<Req, Res> Balancer<Req, Res> for RoundRobin<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn endpoint(&self) -> Result<Endpoint<Req, Res>> {
        let endpoints = self.cache.endpoints();
        if endpoints.is_empty() {
            return Err(EndpointError::NoEndpoints);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Ok(endpoints[idx].clone())
    }
}

/// Uniform pick from the endpoint set. Seedable for deterministic tests.
pub struct Random<Req, Res> {
    cache: Arc<EndpointCache<Req, Res>>,
    rng: Mutex<StdRng>,
}

impl<Req, Res> Random<Req, Res> {
    pub fn new(cache: Arc<EndpointCache<Req, Res>>) -> Self {
        Self {
            cache,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(cache: Arc<EndpointCache<Req, Res>>, seed: u64) -> Self {
        Self {
            cache,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<Req, Res> Balancer<Req, Res> for Random<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn endpoint(&self) -> Result<Endpoint<Req, Res>> {
        let endpoints = self.cache.endpoints();
        if endpoints.is_empty() {
            return Err(EndpointError::NoEndpoints);
        }
        let idx = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            rng.random_range(0..endpoints.len())
        };
        Ok(endpoints[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::factory::simple_factory;
    use meshkit_core::Context;

    fn cache_of(instances: &[&str]) -> Arc<EndpointCache<(), String>> {
        let cache = Arc::new(EndpointCache::new(simple_factory(|instance: &str| {
            let instance = instance.to_string();
            Ok(Endpoint::new(move |_ctx, _req| {
                let instance = instance.clone();
                async move { Ok(instance) }
            }))
        })));
        cache.apply(&Event::instances(instances.to_vec()));
        cache
    }

    async fn pick(balancer: &dyn Balancer<(), String>) -> String {
        balancer
            .endpoint()
            .unwrap()
            .call(Context::background(), ())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_robin_cycles_in_order() {
        let balancer = RoundRobin::new(cache_of(&["a", "b", "c"]));
        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(pick(&balancer).await);
        }
        assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_round_robin_empty_cache() {
        let balancer = RoundRobin::new(cache_of(&[]));
        assert!(matches!(
            balancer.endpoint().unwrap_err(),
            EndpointError::NoEndpoints
        ));
    }

    #[tokio::test]
    async fn test_round_robin_tracks_cache_changes() {
        let cache = cache_of(&["a", "b"]);
        let balancer = RoundRobin::new(Arc::clone(&cache));
        pick(&balancer).await;
        cache.apply(&Event::instances(["a"]));
        // Only one endpoint remains; every pick lands on it.
        assert_eq!(pick(&balancer).await, "a");
        assert_eq!(pick(&balancer).await, "a");
    }

    #[tokio::test]
    async fn test_random_is_deterministic_under_seed() {
        let cache = cache_of(&["a", "b", "c"]);
        let one = Random::with_seed(Arc::clone(&cache), 7);
        let two = Random::with_seed(cache, 7);
        for _ in 0..10 {
            assert_eq!(pick(&one).await, pick(&two).await);
        }
    }

    #[tokio::test]
    async fn test_random_eventually_covers_all_endpoints() {
        let balancer = Random::with_seed(cache_of(&["a", "b", "c"]), 42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(pick(&balancer).await);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_random_empty_cache() {
        let balancer = Random::with_seed(cache_of(&[]), 1);
        assert!(matches!(
            balancer.endpoint().unwrap_err(),
            EndpointError::NoEndpoints
        ));
    }
}
