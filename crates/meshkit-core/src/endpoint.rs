use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{EndpointError, Result};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The unit of composition: a single async operation from request to
/// response.
///
/// Everything above a transport is an `Endpoint`: server handlers, client
/// stubs produced by a factory, and the output of every middleware wrap.
/// Cloning is cheap (a shared handle to the same function), which is what
/// lets caches hand out snapshots and balancers pick without locking.
///
/// # Example
///
/// ```
/// use meshkit_core::{Context, Endpoint};
///
/// # async fn demo() {
/// let double: Endpoint<u64, u64> = Endpoint::new(|_ctx, req: u64| async move { Ok(req * 2) });
/// let res = double.call(Context::background(), 21).await.unwrap();
/// assert_eq!(res, 42);
/// # }
/// ```
pub struct Endpoint<Req, Res> {
    inner: Arc<dyn Fn(Context, Req) -> BoxFuture<Result<Res>> + Send + Sync>,
}

impl<Req, Res> Clone for Endpoint<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> fmt::Debug for Endpoint<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl<Req, Res> Endpoint<Req, Res> {
    /// Invokes the endpoint.
    pub fn call(&self, ctx: Context, req: Req) -> BoxFuture<Result<Res>> {
        (self.inner)(ctx, req)
    }

    /// Stable identity of the underlying function, shared by all clones.
    ///
    /// Retry uses this to remember which instances it already tried within
    /// one call; caches use it to detect that an instance's endpoint was
    /// replaced.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Whether two handles point at the same underlying function.
    pub fn same(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<Req, Res> Endpoint<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Wraps an async function as an endpoint.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx, req| Box::pin(f(ctx, req))),
        }
    }

    /// An endpoint that fails every call with a clone-able error factory.
    /// Useful as a placeholder while a real backend is unavailable.
    pub fn failing<F>(err: F) -> Self
    where
        F: Fn() -> EndpointError + Send + Sync + 'static,
    {
        Self::new(move |_ctx, _req| {
            let e = err();
            async move { Err(e) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_passes_request_through() {
        let ep: Endpoint<String, usize> =
            Endpoint::new(|_ctx, req: String| async move { Ok(req.len()) });
        let res = ep.call(Context::background(), "hello".to_string()).await;
        assert_eq!(res.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_clones_share_identity() {
        let a: Endpoint<(), ()> = Endpoint::new(|_ctx, _req| async { Ok(()) });
        let b = a.clone();
        let c: Endpoint<(), ()> = Endpoint::new(|_ctx, _req| async { Ok(()) });

        assert!(a.same(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.same(&c));
    }

    #[tokio::test]
    async fn test_failing_endpoint() {
        let ep: Endpoint<(), ()> = Endpoint::failing(|| EndpointError::NoEndpoints);
        let err = ep.call(Context::background(), ()).await.unwrap_err();
        assert!(matches!(err, EndpointError::NoEndpoints));
    }

    #[test]
    fn test_debug_shows_identity() {
        let ep: Endpoint<(), ()> = Endpoint::failing(|| EndpointError::NoEndpoints);
        let rendered = format!("{ep:?}");
        assert!(rendered.starts_with("Endpoint"));
        assert!(rendered.contains(&format!("{}", ep.id())));
    }

    #[tokio::test]
    async fn test_endpoint_sees_context_values() {
        struct Marker(u32);
        let ep: Endpoint<(), u32> = Endpoint::new(|ctx, _req| async move {
            Ok(ctx.value::<Marker>().map(|m| m.0).unwrap_or(0))
        });
        let ctx = Context::background().with_value(Marker(7));
        assert_eq!(ep.call(ctx, ()).await.unwrap(), 7);
    }
}
