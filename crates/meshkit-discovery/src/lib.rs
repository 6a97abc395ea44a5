//! Meshkit Discovery
//!
//! The service discovery and client-side load-balancing pipeline: an
//! [`Instancer`] yields [`Event`]s naming the live instance set, an
//! [`EndpointCache`] turns identifiers into live endpoints through a
//! user-supplied [`Factory`], a [`Balancer`] picks one per call, and
//! [`retry`] wraps the balancer with attempt and deadline budgets. The
//! [`Registrar`] side publishes this process's own liveness.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use meshkit_core::{Context, Endpoint};
//! use meshkit_discovery::{
//!     retry, Balancer, Endpointer, RetryConfig, RoundRobin, StaticInstancer, simple_factory,
//! };
//!
//! # async fn demo() {
//! let instancer = Arc::new(StaticInstancer::new(["10.0.0.1:8000", "10.0.0.2:8000"]));
//! let factory = simple_factory(|instance: &str| {
//!     let instance = instance.to_string();
//!     Ok(Endpoint::new(move |_ctx, req: String| {
//!         let instance = instance.clone();
//!         async move { Ok(format!("{instance} handled {req}")) }
//!     }))
//! });
//! let endpointer = Endpointer::new(instancer, factory);
//! let balancer: Arc<dyn Balancer<String, String>> = Arc::new(RoundRobin::new(endpointer.cache()));
//! let ep = retry(RetryConfig::new(3, Duration::from_secs(5)), balancer);
//!
//! let res = ep.call(Context::background(), "ping".to_string()).await;
//! # let _ = res;
//! # }
//! ```

mod balancer;
mod cache;
mod event;
mod factory;
mod instancer;
mod registrar;
mod retry;

pub use balancer::{Balancer, Random, RoundRobin};
pub use cache::{EndpointCache, Endpointer};
pub use event::{DiscoveryError, Event};
pub use factory::{factory_fn, simple_factory, Closer, Factory};
pub use instancer::{EventSink, Instancer, StaticInstancer, SubjectInstancer, SubscriptionId};
pub use registrar::{MemoryRegistry, Registrar, Registration, RegistryBackend, TtlRegistrar};
pub use retry::{retry, retry_with_callback, RetryCallback, RetryConfig};
