//! Endpoint decoration.
//!
//! A [`Middleware`] turns one [`Endpoint`] into another with the same
//! request/response types. Cross-cutting behaviour (logging, metrics, rate
//! limiting, circuit breaking) is expressed as middlewares and composed with
//! [`chain`] rather than baked into endpoints.

mod circuit_breaker;
mod instrument;
mod logging;
mod rate_limit;
mod trace;

pub use circuit_breaker::{circuit_breaker, circuit_breaker_with, CircuitBreakerConfig};
pub use instrument::{instrument, instrument_with};
pub use logging::{logging, logging_with};
pub use rate_limit::{rate_limit, RateLimitConfig, TokenBucket};
pub use trace::{trace_span, TraceId};

use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::Failer;

/// An endpoint transformer. Applying it produces a new endpoint that wraps
/// the given one; the original remains usable.
pub struct Middleware<Req, Res> {
    inner: Arc<dyn Fn(Endpoint<Req, Res>) -> Endpoint<Req, Res> + Send + Sync>,
}

impl<Req, Res> Clone for Middleware<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Endpoint<Req, Res>) -> Endpoint<Req, Res> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// The no-op middleware: `identity().apply(e)` is `e` itself.
    pub fn identity() -> Self {
        Self::new(|e| e)
    }

    pub fn apply(&self, endpoint: Endpoint<Req, Res>) -> Endpoint<Req, Res> {
        (self.inner)(endpoint)
    }
}

/// Applies middlewares so the first listed becomes the outermost wrapper.
///
/// `chain(vec![a, b, c], e)` behaves as `a(b(c(e)))`: a request flows through
/// `a` first, `e` last.
pub fn chain<Req, Res>(
    middlewares: Vec<Middleware<Req, Res>>,
    endpoint: Endpoint<Req, Res>,
) -> Endpoint<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    middlewares
        .into_iter()
        .rev()
        .fold(endpoint, |e, mw| mw.apply(e))
}

/// Outcome classifier built on the [`Failer`] capability: a successful
/// response that still carries a business failure is reported as failed.
pub fn classify_failer<Res: Failer>(res: &Res) -> Option<String> {
    res.failed().map(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::Mutex;

    fn tagging(
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> Middleware<(), Vec<&'static str>> {
        Middleware::new(move |next| {
            let log = Arc::clone(&log);
            Endpoint::new(move |ctx, req| {
                log.lock().unwrap().push(tag);
                next.call(ctx, req)
            })
        })
    }

    #[tokio::test]
    async fn test_chain_first_listed_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base: Endpoint<(), Vec<&'static str>> = {
            let log = Arc::clone(&log);
            Endpoint::new(move |_ctx, _req| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push("endpoint");
                    Ok(log.lock().unwrap().clone())
                }
            })
        };

        let chained = chain(
            vec![
                tagging("outer", Arc::clone(&log)),
                tagging("middle", Arc::clone(&log)),
                tagging("inner", Arc::clone(&log)),
            ],
            base,
        );

        let seen = chained.call(Context::background(), ()).await.unwrap();
        assert_eq!(seen, vec!["outer", "middle", "inner", "endpoint"]);
    }

    #[tokio::test]
    async fn test_identity_is_noop() {
        let base: Endpoint<u32, u32> = Endpoint::new(|_ctx, req| async move { Ok(req + 1) });
        let wrapped = Middleware::identity().apply(base.clone());
        assert!(wrapped.same(&base));
        assert_eq!(wrapped.call(Context::background(), 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let base: Endpoint<u32, u32> = Endpoint::new(|_ctx, req| async move { Ok(req) });
        let chained = chain(Vec::new(), base.clone());
        assert!(chained.same(&base));
    }

    #[test]
    fn test_classify_failer_reports_business_failure() {
        use crate::error::EndpointError;

        struct Resp(Option<EndpointError>);
        impl Failer for Resp {
            fn failed(&self) -> Option<&EndpointError> {
                self.0.as_ref()
            }
        }

        assert!(classify_failer(&Resp(None)).is_none());
        assert_eq!(
            classify_failer(&Resp(Some(EndpointError::RateLimited))).unwrap(),
            "rate limit exceeded"
        );
    }
}
