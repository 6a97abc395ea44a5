use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::middleware::Middleware;

/// Emits one structured event per call: method, elapsed time, and the error
/// when the call failed.
pub fn logging<Req, Res>(method: &str) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    logging_with(method, |_res: &Res| None)
}

/// Like [`logging`], with a classifier that can mark a successful response as
/// a business failure (see [`classify_failer`](crate::middleware::classify_failer)).
pub fn logging_with<Req, Res, C>(method: &str, classify: C) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    C: Fn(&Res) -> Option<String> + Send + Sync + 'static,
{
    let method = method.to_string();
    let classify = Arc::new(classify);
    Middleware::new(move |next| {
        let method = method.clone();
        let classify = Arc::clone(&classify);
        Endpoint::new(move |ctx, req| {
            let method = method.clone();
            let classify = Arc::clone(&classify);
            let next = next.clone();
            async move {
                let start = Instant::now();
                let result = next.call(ctx, req).await;
                let elapsed_us = start.elapsed().as_micros() as u64;
                match &result {
                    Ok(res) => match classify(res) {
                        Some(failure) => {
                            warn!(method = %method, elapsed_us, failure = %failure, "call failed")
                        }
                        None => debug!(method = %method, elapsed_us, "call completed"),
                    },
                    Err(err) => warn!(method = %method, elapsed_us, error = %err, "call failed"),
                }
                result
            }
        })
    })
}
