//! Token bucket admission control for endpoints.
//!
//! The bucket allows bursts up to `burst` tokens while limiting the sustained
//! rate to `rate` tokens per second. A call that finds the bucket empty fails
//! immediately with [`EndpointError::RateLimited`]; nothing queues.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;
use crate::error::EndpointError;
use crate::middleware::Middleware;

/// Token bucket parameters.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum sustained call rate (tokens refilled per second).
    pub rate: f64,
    /// Maximum burst size (bucket capacity).
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }

    /// `rate` calls per second with a burst of twice the rate.
    pub fn per_second(rate: f64) -> Self {
        Self::new(rate, (rate * 2.0).ceil() as u32)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(100.0)
    }
}

/// Token bucket state. Refill is computed lazily from the time elapsed since
/// the last consume attempt.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            config,
            last_update: Instant::now(),
        }
    }

    /// Attempts to consume one token at `now`. Returns `false` when the
    /// bucket is empty.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.rate).min(self.config.burst as f64);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token becomes available.
    pub fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.config.rate)
        }
    }
}

/// Rejects calls exceeding the configured rate with
/// [`EndpointError::RateLimited`], without invoking the inner endpoint.
///
/// All endpoints produced by one `rate_limit` middleware value share a single
/// bucket; apply separate middleware values for independent limits.
pub fn rate_limit<Req, Res>(config: RateLimitConfig) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let bucket = Arc::new(Mutex::new(TokenBucket::new(config)));
    Middleware::new(move |next| {
        let bucket = Arc::clone(&bucket);
        Endpoint::new(move |ctx, req| {
            let allowed = match bucket.lock() {
                Ok(mut bucket) => bucket.try_consume(Instant::now()),
                Err(poisoned) => poisoned.into_inner().try_consume(Instant::now()),
            };
            let next = next.clone();
            async move {
                if !allowed {
                    return Err(EndpointError::RateLimited);
                }
                next.call(ctx, req).await
            }
        })
    })
}
