//! Meshkit Core
//!
//! The composition model the rest of meshkit is built on: every operation is
//! an [`Endpoint`] (an async function from request to response), and every
//! cross-cutting concern is a [`Middleware`] that wraps one endpoint in
//! another. A [`Service`] names a set of endpoints; [`transport`] defines the
//! codec boundary a wire transport plugs into.
//!
//! # Architecture
//!
//! - [`Context`]: per-call deadline and typed values, derived immutably.
//! - [`Endpoint`]: the unit of composition, cloneable, identity-comparable.
//! - [`Middleware`] and [`chain`]: decoration, first listed outermost.
//! - [`middleware`]: reference middlewares (logging, instrumentation,
//!   tracing spans, rate limiting, circuit breaking).
//! - [`EndpointError`]: the error vocabulary shared across the toolkit.
//!
//! # Example
//!
//! ```rust
//! use meshkit_core::middleware::{logging, rate_limit, RateLimitConfig};
//! use meshkit_core::{chain, Context, Endpoint};
//!
//! # async fn demo() {
//! let ep: Endpoint<u64, u64> = Endpoint::new(|_ctx, req: u64| async move { Ok(req + 1) });
//! let ep = chain(
//!     vec![logging("increment"), rate_limit(RateLimitConfig::per_second(100.0))],
//!     ep,
//! );
//! let res = ep.call(Context::background(), 41).await.unwrap();
//! assert_eq!(res, 42);
//! # }
//! ```

mod context;
mod endpoint;
mod error;
pub mod middleware;
mod service;
pub mod transport;

pub use context::Context;
pub use endpoint::{BoxFuture, Endpoint};
pub use error::{EndpointError, Failer, Result};
pub use middleware::{chain, Middleware};
pub use service::{Service, ServiceBuilder};
