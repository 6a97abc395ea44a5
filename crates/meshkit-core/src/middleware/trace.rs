use std::fmt;

use tracing::Instrument;

use crate::endpoint::Endpoint;
use crate::middleware::Middleware;

/// Call-scoped trace identity, carried in the [`Context`](crate::Context)
/// value chain so every layer of a call logs under the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(pub u64);

impl TraceId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Runs the inner call inside a `tracing` span carrying the operation name
/// and a [`TraceId`]. A caller-supplied id in the context is reused; a fresh
/// one is generated and attached otherwise, so downstream middlewares and
/// endpoints see the same id.
pub fn trace_span<Req, Res>(operation: &str) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let operation = operation.to_string();
    Middleware::new(move |next| {
        let operation = operation.clone();
        Endpoint::new(move |ctx, req| {
            let next = next.clone();
            let trace_id = match ctx.value::<TraceId>() {
                Some(id) => *id,
                None => TraceId::generate(),
            };
            let ctx = ctx.with_value(trace_id);
            let span = tracing::debug_span!("call", operation = %operation, trace_id = %trace_id);
            async move { next.call(ctx, req).await }.instrument(span)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test]
    async fn test_attaches_trace_id_when_absent() {
        let ep: Endpoint<(), Option<TraceId>> =
            Endpoint::new(|ctx, _req| async move { Ok(ctx.value::<TraceId>().map(|id| *id)) });
        let traced = trace_span("op").apply(ep);
        let seen = traced.call(Context::background(), ()).await.unwrap();
        assert!(seen.is_some());
    }

    #[tokio::test]
    async fn test_reuses_caller_trace_id() {
        let ep: Endpoint<(), Option<TraceId>> =
            Endpoint::new(|ctx, _req| async move { Ok(ctx.value::<TraceId>().map(|id| *id)) });
        let traced = trace_span("op").apply(ep);
        let ctx = Context::background().with_value(TraceId(42));
        let seen = traced.call(ctx, ()).await.unwrap();
        assert_eq!(seen, Some(TraceId(42)));
    }

    #[test]
    fn test_trace_id_renders_as_hex() {
        assert_eq!(TraceId(0xdead_beef).to_string(), "00000000deadbeef");
    }
}
