use std::sync::Arc;
use std::time::Instant;

use meshkit_metrics::{Counter, Histogram};

use crate::endpoint::Endpoint;
use crate::middleware::Middleware;

/// Counts calls and observes their duration (seconds), labelled by `method`
/// and `outcome` (`success` or `error`).
///
/// The `method` label is bound once here; each call adds only the outcome,
/// so the handles passed in may already carry labels of their own.
pub fn instrument<Req, Res, C, H>(method: &str, requests: C, duration: H) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    C: Counter,
    H: Histogram,
{
    instrument_with(method, requests, duration, |_res: &Res| None)
}

/// Like [`instrument`], with a classifier that can mark a successful response
/// as a business failure.
pub fn instrument_with<Req, Res, C, H, F>(
    method: &str,
    requests: C,
    duration: H,
    classify: F,
) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    C: Counter,
    H: Histogram,
    F: Fn(&Res) -> Option<String> + Send + Sync + 'static,
{
    let requests = requests.with(&["method", method]);
    let duration = duration.with(&["method", method]);
    let classify = Arc::new(classify);
    Middleware::new(move |next| {
        let requests = requests.clone();
        let duration = duration.clone();
        let classify = Arc::clone(&classify);
        Endpoint::new(move |ctx, req| {
            let requests = requests.clone();
            let duration = duration.clone();
            let classify = Arc::clone(&classify);
            let next = next.clone();
            async move {
                let start = Instant::now();
                let result = next.call(ctx, req).await;
                let outcome = match &result {
                    Ok(res) if classify(res).is_none() => "success",
                    _ => "error",
                };
                requests.with(&["outcome", outcome]).add(1.0);
                duration
                    .with(&["outcome", outcome])
                    .observe(start.elapsed().as_secs_f64());
                result
            }
        })
    })
}
