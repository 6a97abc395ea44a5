//! Circuit breaker for endpoints.
//!
//! Closed tracks the outcome of the most recent `window` calls; once the
//! window is full and the failure fraction reaches `failure_threshold`, the
//! circuit opens. While open, calls fail fast with
//! [`EndpointError::CircuitOpen`] and the inner endpoint is never invoked.
//! After the cooldown the first arrivals run as half-open probes: a probe
//! success closes the circuit (with a fresh window), a probe failure
//! re-opens it for another cooldown.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::endpoint::Endpoint;
use crate::error::EndpointError;
use crate::middleware::Middleware;

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Failure fraction (0.0..=1.0) over the window that trips the circuit.
    pub failure_threshold: f64,
    /// Number of recent calls considered; the circuit can only trip once
    /// this many outcomes have been recorded.
    pub window: usize,
    /// How long the circuit stays open before admitting probes.
    pub cooldown: Duration,
    /// Concurrent calls admitted while half-open.
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window: 10,
            cooldown: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    /// Ring of recent outcomes, `true` = failure, newest at the back.
    Closed { outcomes: VecDeque<bool> },
    Open { until: Instant },
    HalfOpen { in_flight: u32 },
}

struct Breaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Breaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed {
                outcomes: VecDeque::with_capacity(config.window),
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admission check, run before the inner call.
    fn try_acquire(&self) -> Result<(), EndpointError> {
        let mut state = self.lock();
        match &mut *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { until } => {
                if Instant::now() >= *until {
                    info!("circuit half-open, admitting probe");
                    *state = BreakerState::HalfOpen { in_flight: 1 };
                    Ok(())
                } else {
                    Err(EndpointError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen { in_flight } => {
                if *in_flight < self.config.half_open_probes {
                    *in_flight += 1;
                    Ok(())
                } else {
                    Err(EndpointError::CircuitOpen)
                }
            }
        }
    }

    fn record(&self, failed: bool) {
        let mut state = self.lock();
        match &mut *state {
            BreakerState::Closed { outcomes } => {
                if outcomes.len() == self.config.window {
                    outcomes.pop_front();
                }
                outcomes.push_back(failed);
                if outcomes.len() >= self.config.window && self.config.window > 0 {
                    let failures = outcomes.iter().filter(|f| **f).count();
                    let fraction = failures as f64 / outcomes.len() as f64;
                    if fraction >= self.config.failure_threshold {
                        warn!(failures, window = outcomes.len(), "circuit opened");
                        *state = BreakerState::Open {
                            until: Instant::now() + self.config.cooldown,
                        };
                    }
                }
            }
            BreakerState::HalfOpen { .. } => {
                if failed {
                    warn!("circuit re-opened after failed probe");
                    *state = BreakerState::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                } else {
                    info!("circuit closed after successful probe");
                    *state = BreakerState::Closed {
                        outcomes: VecDeque::with_capacity(self.config.window),
                    };
                }
            }
            // A call admitted before the trip finished after it; the
            // cooldown already in progress stands.
            BreakerState::Open { .. } => {}
        }
    }
}

/// Wraps an endpoint with a circuit breaker. Errors count as failures;
/// successful responses count as successes.
pub fn circuit_breaker<Req, Res>(config: CircuitBreakerConfig) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    circuit_breaker_with(config, |_res: &Res| None)
}

/// Like [`circuit_breaker`], with a classifier that can count a successful
/// response as a failure.
pub fn circuit_breaker_with<Req, Res, C>(
    config: CircuitBreakerConfig,
    classify: C,
) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    C: Fn(&Res) -> Option<String> + Send + Sync + 'static,
{
    let breaker = Arc::new(Breaker::new(config));
    let classify = Arc::new(classify);
    Middleware::new(move |next| {
        let breaker = Arc::clone(&breaker);
        let classify = Arc::clone(&classify);
        Endpoint::new(move |ctx, req| {
            let breaker = Arc::clone(&breaker);
            let classify = Arc::clone(&classify);
            let next = next.clone();
            async move {
                breaker.try_acquire()?;
                let result = next.call(ctx, req).await;
                let failed = match &result {
                    Ok(res) => classify(res).is_some(),
                    Err(_) => true,
                };
                breaker.record(failed);
                result
            }
        })
    })
}
