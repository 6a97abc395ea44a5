//! Meshkit Metrics
//!
//! This crate provides the dimensional metrics facade used throughout
//! meshkit: a minimal vocabulary of three metric kinds (counter, gauge,
//! histogram) with ordered key/value labels, plus a [`Provider`] abstraction
//! that constructs handles against a concrete backend.
//!
//! # Architecture
//!
//! The facade is built around three pieces:
//!
//! - [`Counter`] / [`Gauge`] / [`Histogram`]: the metric handle contracts.
//!   Handles are cheap to clone; `with()` derives a new handle with extra
//!   labels and never mutates the original.
//! - [`Provider`]: a factory for the three kinds, bound to one backend.
//!   Providers own backend lifecycle (background flush tasks, sockets);
//!   [`Provider::stop`] releases them.
//! - Backends: [`mem`] keeps everything in process memory with readable
//!   totals (the reference backend, also used by tests); [`push`] queues
//!   samples and flushes them to a [`push::Sink`] on an interval.
//!
//! # Failure semantics
//!
//! Emission failures are operational, not caller errors: `add`/`set`/
//! `observe` never return a `Result` and never panic on backend trouble.
//! Backends log failures via `tracing` and keep going.
//!
//! # Example
//!
//! ```rust
//! use meshkit_metrics::{Counter, MetricId, Provider};
//! use meshkit_metrics::mem::MemProvider;
//!
//! let provider = MemProvider::new();
//! let requests = provider.counter(
//!     MetricId::new("requests_total").help("Total requests").label_keys(&["method"]),
//! );
//!
//! requests.with(&["method", "get"]).add(1.0);
//! requests.with(&["method", "put"]).add(2.0);
//! assert_eq!(requests.with(&["method", "get"]).value(), 1.0);
//! ```

mod label;
pub mod mem;
pub mod push;

pub use label::{expand_name, LabelValues, SENTINEL};

/// Identity of a metric: name, help text, advisory label keys, and optional
/// histogram buckets.
///
/// Backends that require upfront label declaration use `label_keys`; for the
/// others the keys are documentation. `buckets` is meaningful only for
/// histograms and backends with fixed-bucket summarisation.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricId {
    pub name: String,
    pub help: String,
    pub label_keys: Vec<String>,
    pub buckets: Option<Vec<f64>>,
}

impl MetricId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            label_keys: Vec::new(),
            buckets: None,
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn label_keys(mut self, keys: &[&str]) -> Self {
        self.label_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Explicit histogram bucket upper bounds, in ascending order.
    pub fn buckets(mut self, bounds: Vec<f64>) -> Self {
        self.buckets = Some(bounds);
        self
    }
}

/// A monotonically increasing counter.
///
/// `add` accepts non-negative deltas; negative deltas are a programmer error
/// and are clamped to zero by implementations rather than crashing.
pub trait Counter: Clone + Send + Sync + 'static {
    /// Derives a new handle with `labelvalues` (alternating key, value)
    /// appended to this handle's labels. The receiver is unchanged.
    fn with(&self, labelvalues: &[&str]) -> Self;

    /// Adds `delta` to the series identified by this handle's labels.
    fn add(&self, delta: f64);
}

/// An instantaneous value that can move in both directions.
pub trait Gauge: Clone + Send + Sync + 'static {
    fn with(&self, labelvalues: &[&str]) -> Self;

    fn set(&self, value: f64);

    /// Adds `delta` (which may be negative) to the current value. Backends
    /// without a native add emulate it with a local read; that emulation is
    /// not safe for multi-process aggregation, so prefer `set` when several
    /// processes write the same series.
    fn add(&self, delta: f64);
}

/// A distribution of observed values, summarised by the backend.
pub trait Histogram: Clone + Send + Sync + 'static {
    fn with(&self, labelvalues: &[&str]) -> Self;

    fn observe(&self, value: f64);
}

/// A factory for the three metric kinds, bound to one backend.
///
/// Providers own the lifecycle of whatever the backend needs (flush tasks,
/// sockets, aggregate state). `stop` signals the backend to flush pending
/// observations and release those resources; backends with background
/// machinery complete the final flush asynchronously and expose an awaitable
/// shutdown (see [`push::PushProvider::join`]). Metric handles outliving
/// their provider degrade to no-ops rather than erroring.
pub trait Provider: Send + Sync {
    type Counter: Counter;
    type Gauge: Gauge;
    type Histogram: Histogram;

    fn counter(&self, id: MetricId) -> Self::Counter;
    fn gauge(&self, id: MetricId) -> Self::Gauge;
    fn histogram(&self, id: MetricId) -> Self::Histogram;

    /// Signals the backend to flush pending observations and release its
    /// resources. May return before the final flush completes.
    fn stop(&self);
}
