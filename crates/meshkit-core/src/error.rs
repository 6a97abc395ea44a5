use thiserror::Error;

/// Failures surfaced by endpoints and the middleware stack.
///
/// The split follows one rule: anything a caller could reasonably retry is
/// returned; anything purely operational (metric flush, background factory
/// failure, discovery refresh) is logged where it happens and never reaches
/// the caller as an error.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Service lookup by method name failed.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A balancer was consulted while its endpoint set was empty.
    #[error("no endpoints available")]
    NoEndpoints,

    /// The rate limit middleware's token bucket was empty.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The circuit breaker middleware is open.
    #[error("circuit open")]
    CircuitOpen,

    /// The call's deadline elapsed. Wraps the last attempt failure when one
    /// was observed before the deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded {
        #[source]
        source: Option<Box<EndpointError>>,
    },

    /// The retry loop ran out of attempts. Exposes the last attempt failure.
    #[error("maximum attempts reached after {attempts} attempts")]
    AttemptsExhausted {
        attempts: usize,
        #[source]
        source: Option<Box<EndpointError>>,
    },

    /// Connection-level failure reported by a transport or factory.
    #[error("transport error: {0}")]
    Transport(String),

    /// Business-level failure reported by the endpoint itself.
    #[error("application error: {0}")]
    Application(String),

    /// Failure from outside the core vocabulary.
    #[error("{0}")]
    Other(String),
}

impl EndpointError {
    /// Wraps an arbitrary error into the core vocabulary.
    pub fn other(err: impl std::fmt::Display) -> Self {
        Self::Other(err.to_string())
    }

    /// Whether a caller-side retry against another instance could plausibly
    /// succeed. Deadline and budget exhaustion are terminal; method-not-found
    /// is structural.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoEndpoints | Self::RateLimited | Self::CircuitOpen | Self::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;

/// Capability query for response types whose `Ok` value can still carry a
/// business failure.
///
/// Middlewares that classify call outcomes (logging, instrumentation,
/// circuit breaking) consult this instead of knowing the concrete response
/// type: a transport returning `Ok(resp)` with `resp.failed().is_some()`
/// is treated as a failed call.
pub trait Failer {
    fn failed(&self) -> Option<&EndpointError>;
}
