//! Retry over a balancer.
//!
//! [`retry`] turns a [`Balancer`] into an [`Endpoint`] that bounds attempts
//! and total wall-clock time, and that skips endpoints it already tried in
//! the same call while untried ones remain. That skip rule is what makes
//! retries statistically useful against a partially unhealthy fleet. It is
//! deterministic for balancers that cycle the set ([`RoundRobin`] with a
//! single caller) and probabilistic for randomized draws, where each tried
//! endpoint only raises the odds of redrawing an untried one.
//!
//! [`RoundRobin`]: crate::balancer::RoundRobin

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout_at;
use tracing::debug;

use meshkit_core::{Context, Endpoint, EndpointError};

use crate::balancer::Balancer;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempt budget, at least 1.
    pub max_attempts: usize,
    /// Total wall-clock budget across all attempts. Combined with any
    /// caller deadline; the earlier one wins.
    pub timeout: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: usize, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Decides, given the attempt number (1-based) and its failure, whether the
/// loop should continue. The default continues while attempts remain.
pub type RetryCallback = Arc<dyn Fn(usize, &EndpointError) -> bool + Send + Sync>;

/// Wraps `balancer` in a retrying endpoint with the default callback.
pub fn retry<Req, Res>(
    config: RetryConfig,
    balancer: Arc<dyn Balancer<Req, Res>>,
) -> Endpoint<Req, Res>
where
    Req: Clone + Send + 'static,
    Res: Send + 'static,
{
    retry_with_callback(config, balancer, Arc::new(|_attempt, _err| true))
}

/// Wraps `balancer` in a retrying endpoint.
///
/// Per call: derives a child context whose deadline is the earlier of the
/// caller's and `now + timeout`, then loops up to `max_attempts` times,
/// drawing from the balancer and skipping already-tried endpoints while any
/// untried remain (deterministically under a cycling balancer, with high
/// probability under a randomized one). An empty endpoint set fails
/// immediately with
/// [`EndpointError::NoEndpoints`] and does not consume an attempt. Each
/// attempt runs under the child deadline; expiry yields
/// [`EndpointError::DeadlineExceeded`] wrapping the last attempt failure,
/// exhaustion yields [`EndpointError::AttemptsExhausted`].
pub fn retry_with_callback<Req, Res>(
    config: RetryConfig,
    balancer: Arc<dyn Balancer<Req, Res>>,
    callback: RetryCallback,
) -> Endpoint<Req, Res>
where
    Req: Clone + Send + 'static,
    Res: Send + 'static,
{
    Endpoint::new(move |ctx: Context, req: Req| {
        let config = config.clone();
        let balancer = Arc::clone(&balancer);
        let callback = Arc::clone(&callback);
        async move {
            let ctx = ctx.with_timeout(config.timeout);
            let deadline = ctx
                .deadline()
                .unwrap_or_else(|| Instant::now() + config.timeout);

            let mut tried: HashSet<usize> = HashSet::new();
            let mut last_err: Option<EndpointError> = None;
            let mut attempt = 0usize;

            while attempt < config.max_attempts {
                if ctx.is_expired() {
                    return Err(EndpointError::DeadlineExceeded {
                        source: last_err.map(Box::new),
                    });
                }

                // Draw, redrawing past already-tried endpoints. The margin
                // over the tried count covers cycling balancers that repeat
                // a pick (interleaved callers) and shrinks the re-invoke
                // probability under randomized draws; if every available
                // endpoint was tried, fall back to the last draw.
                let mut endpoint = balancer.endpoint()?;
                for _ in 0..tried.len() * 2 + 2 {
                    if !tried.contains(&endpoint.id()) {
                        break;
                    }
                    endpoint = balancer.endpoint()?;
                }

                let invocation = endpoint.call(ctx.clone(), req.clone());
                match timeout_at(tokio::time::Instant::from_std(deadline), invocation).await {
                    Ok(Ok(res)) => return Ok(res),
                    Ok(Err(err)) => {
                        tried.insert(endpoint.id());
                        attempt += 1;
                        debug!(attempt, error = %err, "retry attempt failed");
                        let proceed = callback(attempt, &err);
                        last_err = Some(err);
                        if !proceed {
                            break;
                        }
                    }
                    Err(_elapsed) => {
                        return Err(EndpointError::DeadlineExceeded {
                            source: last_err.map(Box::new),
                        });
                    }
                }
            }

            Err(EndpointError::AttemptsExhausted {
                attempts: attempt,
                source: last_err.map(Box::new),
            })
        }
    })
}
