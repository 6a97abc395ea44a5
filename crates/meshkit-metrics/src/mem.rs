//! In-memory metrics backend.
//!
//! Keeps every series in process memory behind lock-free atomics, with a
//! `RwLock`-protected map from label values to series storage. This is the
//! reference backend: integration tests assert against it, and services can
//! expose its [`MemProvider::snapshot`] through an introspection endpoint.
//!
//! Counter and gauge series are a single atomic `f64`. Histogram series use
//! fixed buckets (caller-supplied bounds, or a log-spaced default ladder)
//! with a running sum and count, so quantile estimates cost a linear scan
//! over a small constant number of buckets regardless of sample volume.

use crate::{Counter, Gauge, Histogram, LabelValues, MetricId, Provider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_lock<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `f64` stored in an `AtomicU64` via bit casting.
///
/// `add` uses a compare-and-swap loop; contention on a single series is
/// expected to be low.
#[derive(Debug, Default)]
struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Map from label pairs to series storage for one metric.
///
/// Reads take the shared lock; creating a previously unseen series takes the
/// exclusive lock briefly. Series themselves are atomics, so the hot path
/// (`add`/`set`/`observe` on an existing series) holds only the read lock.
struct Space<S> {
    series: RwLock<HashMap<Vec<(String, String)>, Arc<S>>>,
}

impl<S> Space<S> {
    fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, labels: &LabelValues, init: impl FnOnce() -> S) -> Arc<S> {
        {
            let series = read_lock(&self.series);
            if let Some(s) = series.get(labels.pairs()) {
                return Arc::clone(s);
            }
        }
        let mut series = write_lock(&self.series);
        Arc::clone(
            series
                .entry(labels.pairs().to_vec())
                .or_insert_with(|| Arc::new(init())),
        )
    }

    fn peek(&self, labels: &LabelValues) -> Option<Arc<S>> {
        read_lock(&self.series).get(labels.pairs()).cloned()
    }

    fn all(&self) -> Vec<(Vec<(String, String)>, Arc<S>)> {
        read_lock(&self.series)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

/// Default histogram bucket bounds: a log-spaced ladder from 1µs to 10ks
/// (in whatever unit the caller observes in), {1, 2.5, 5} per decade.
fn default_buckets() -> Vec<f64> {
    let mut bounds = Vec::with_capacity(30);
    for exp in -6i32..=3 {
        let base = 10f64.powi(exp);
        bounds.push(base);
        bounds.push(base * 2.5);
        bounds.push(base * 5.0);
    }
    bounds
}

/// Fixed-bucket histogram storage for one series.
struct HistogramSeries {
    bounds: Arc<Vec<f64>>,
    /// counts[i] holds observations <= bounds[i]; the final slot is overflow.
    counts: Vec<AtomicU64>,
    sum: AtomicF64,
    count: AtomicU64,
}

impl HistogramSeries {
    fn new(bounds: Arc<Vec<f64>>) -> Self {
        let counts = (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum: AtomicF64::default(),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .partition_point(|b| *b < value)
            .min(self.counts.len() - 1);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Estimates the value at quantile `q` (0.0..=1.0) with linear
    /// interpolation inside the containing bucket. Returns 0.0 when the
    /// series holds no samples.
    fn quantile(&self, q: f64) -> f64 {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let target = (q.clamp(0.0, 1.0) * total as f64).ceil().max(1.0) as u64;

        let mut cumulative = 0u64;
        for (idx, slot) in self.counts.iter().enumerate() {
            let in_bucket = slot.load(Ordering::Relaxed);
            if cumulative + in_bucket >= target {
                let lower = if idx == 0 { 0.0 } else { self.bounds[idx - 1] };
                let upper = self
                    .bounds
                    .get(idx)
                    .copied()
                    .unwrap_or_else(|| self.bounds.last().copied().unwrap_or(0.0));
                if in_bucket == 0 {
                    return (lower + upper) / 2.0;
                }
                let fraction = (target - cumulative) as f64 / in_bucket as f64;
                return lower + fraction * (upper - lower);
            }
            cumulative += in_bucket;
        }
        self.bounds.last().copied().unwrap_or(0.0)
    }
}

/// In-memory counter handle. See [`MemProvider`].
#[derive(Clone)]
pub struct MemCounter {
    id: Arc<MetricId>,
    labels: LabelValues,
    space: Arc<Space<AtomicF64>>,
}

impl MemCounter {
    /// Current total for this handle's label combination.
    pub fn value(&self) -> f64 {
        self.space.peek(&self.labels).map_or(0.0, |s| s.get())
    }

    pub fn label_values(&self) -> &LabelValues {
        &self.labels
    }
}

impl Counter for MemCounter {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            space: Arc::clone(&self.space),
        }
    }

    fn add(&self, delta: f64) {
        let delta = if delta < 0.0 {
            tracing::debug!(metric = %self.id.name, delta, "negative counter delta clamped to zero");
            0.0
        } else {
            delta
        };
        self.space.get(&self.labels, AtomicF64::default).add(delta);
    }
}

/// In-memory gauge handle. See [`MemProvider`].
#[derive(Clone)]
pub struct MemGauge {
    id: Arc<MetricId>,
    labels: LabelValues,
    space: Arc<Space<AtomicF64>>,
}

impl MemGauge {
    pub fn value(&self) -> f64 {
        self.space.peek(&self.labels).map_or(0.0, |s| s.get())
    }

    pub fn label_values(&self) -> &LabelValues {
        &self.labels
    }
}

impl Gauge for MemGauge {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            space: Arc::clone(&self.space),
        }
    }

    fn set(&self, value: f64) {
        self.space.get(&self.labels, AtomicF64::default).set(value);
    }

    fn add(&self, delta: f64) {
        self.space.get(&self.labels, AtomicF64::default).add(delta);
    }
}

/// In-memory histogram handle. See [`MemProvider`].
#[derive(Clone)]
pub struct MemHistogram {
    id: Arc<MetricId>,
    labels: LabelValues,
    bounds: Arc<Vec<f64>>,
    space: Arc<Space<HistogramSeries>>,
}

impl MemHistogram {
    /// Number of samples observed for this label combination.
    pub fn count(&self) -> u64 {
        self.space
            .peek(&self.labels)
            .map_or(0, |s| s.count.load(Ordering::Relaxed))
    }

    /// Sum of samples observed for this label combination.
    pub fn sum(&self) -> f64 {
        self.space.peek(&self.labels).map_or(0.0, |s| s.sum.get())
    }

    /// Estimated quantile (`0.0..=1.0`) for this label combination.
    pub fn quantile(&self, q: f64) -> f64 {
        self.space.peek(&self.labels).map_or(0.0, |s| s.quantile(q))
    }

    pub fn label_values(&self) -> &LabelValues {
        &self.labels
    }
}

impl Histogram for MemHistogram {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            bounds: Arc::clone(&self.bounds),
            space: Arc::clone(&self.space),
        }
    }

    fn observe(&self, value: f64) {
        let bounds = Arc::clone(&self.bounds);
        self.space
            .get(&self.labels, || HistogramSeries::new(bounds))
            .observe(value);
    }
}

enum Registered {
    Counter(Arc<MetricId>, Arc<Space<AtomicF64>>),
    Gauge(Arc<MetricId>, Arc<Space<AtomicF64>>),
    Histogram(Arc<MetricId>, Arc<Space<HistogramSeries>>),
}

/// One series in a [`MetricsSnapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct SeriesValue {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Histogram summary in a [`MetricsSnapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct HistogramValue {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time copy of every series a [`MemProvider`] has seen.
///
/// Serializable so services can expose it from an introspection endpoint.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<SeriesValue>,
    pub gauges: Vec<SeriesValue>,
    pub histograms: Vec<HistogramValue>,
}

/// In-memory [`Provider`].
///
/// Handles share storage with the provider, so [`MemProvider::snapshot`]
/// observes everything recorded through any derived handle. `stop` is a
/// no-op: there is no background machinery to release.
#[derive(Default)]
pub struct MemProvider {
    registered: Mutex<Vec<Registered>>,
}

impl MemProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current value of every series into a serializable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let registered = lock(&self.registered);
        let mut snapshot = MetricsSnapshot::default();
        for metric in registered.iter() {
            match metric {
                Registered::Counter(id, space) => {
                    for (labels, series) in space.all() {
                        snapshot.counters.push(SeriesValue {
                            name: id.name.clone(),
                            labels,
                            value: series.get(),
                        });
                    }
                }
                Registered::Gauge(id, space) => {
                    for (labels, series) in space.all() {
                        snapshot.gauges.push(SeriesValue {
                            name: id.name.clone(),
                            labels,
                            value: series.get(),
                        });
                    }
                }
                Registered::Histogram(id, space) => {
                    for (labels, series) in space.all() {
                        snapshot.histograms.push(HistogramValue {
                            name: id.name.clone(),
                            labels,
                            count: series.count.load(Ordering::Relaxed),
                            sum: series.sum.get(),
                            p50: series.quantile(0.50),
                            p95: series.quantile(0.95),
                            p99: series.quantile(0.99),
                        });
                    }
                }
            }
        }
        snapshot
    }
}

impl Provider for MemProvider {
    type Counter = MemCounter;
    type Gauge = MemGauge;
    type Histogram = MemHistogram;

    fn counter(&self, id: MetricId) -> MemCounter {
        let id = Arc::new(id);
        let space = Arc::new(Space::new());
        lock(&self.registered).push(Registered::Counter(Arc::clone(&id), Arc::clone(&space)));
        MemCounter {
            id,
            labels: LabelValues::default(),
            space,
        }
    }

    fn gauge(&self, id: MetricId) -> MemGauge {
        let id = Arc::new(id);
        let space = Arc::new(Space::new());
        lock(&self.registered).push(Registered::Gauge(Arc::clone(&id), Arc::clone(&space)));
        MemGauge {
            id,
            labels: LabelValues::default(),
            space,
        }
    }

    fn histogram(&self, id: MetricId) -> MemHistogram {
        let bounds = Arc::new(
            id.buckets
                .clone()
                .unwrap_or_else(default_buckets),
        );
        let id = Arc::new(id);
        let space = Arc::new(Space::new());
        lock(&self.registered).push(Registered::Histogram(Arc::clone(&id), Arc::clone(&space)));
        MemHistogram {
            id,
            labels: LabelValues::default(),
            bounds,
            space,
        }
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_per_label_set() {
        let provider = MemProvider::new();
        let c = provider.counter(MetricId::new("requests").label_keys(&["m"]));

        c.with(&["m", "get"]).add(1.0);
        c.with(&["m", "put"]).add(2.0);
        c.with(&["m", "get"]).add(4.0);

        assert_eq!(c.with(&["m", "get"]).value(), 5.0);
        assert_eq!(c.with(&["m", "put"]).value(), 2.0);
    }

    #[test]
    fn test_counter_with_leaves_original_unchanged() {
        let provider = MemProvider::new();
        let base = provider.counter(MetricId::new("c"));
        let derived = base.with(&["k", "v"]);

        assert!(base.label_values().is_empty());
        assert_eq!(derived.label_values().flattened(), vec!["k", "v"]);
    }

    #[test]
    fn test_counter_negative_delta_clamped() {
        let provider = MemProvider::new();
        let c = provider.counter(MetricId::new("c"));
        c.add(3.0);
        c.add(-10.0);
        assert_eq!(c.value(), 3.0);
    }

    #[test]
    fn test_gauge_set_and_add() {
        let provider = MemProvider::new();
        let g = provider.gauge(MetricId::new("inflight"));
        g.set(10.0);
        g.add(5.0);
        g.add(-7.0);
        assert_eq!(g.value(), 8.0);
    }

    #[test]
    fn test_histogram_count_and_sum() {
        let provider = MemProvider::new();
        let h = provider.histogram(MetricId::new("latency"));
        h.observe(0.1);
        h.observe(0.2);
        h.observe(0.3);
        assert_eq!(h.count(), 3);
        assert!((h.sum() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_quantile_estimation() {
        let provider = MemProvider::new();
        let h = provider.histogram(MetricId::new("latency"));
        for i in 1..=1000 {
            h.observe(i as f64 / 1000.0);
        }
        let p50 = h.quantile(0.50);
        let p99 = h.quantile(0.99);
        assert!(p50 > 0.3 && p50 < 0.7, "p50 {} out of range", p50);
        assert!(p99 > 0.8, "p99 {} out of range", p99);
        assert!(p50 < p99);
    }

    #[test]
    fn test_histogram_explicit_buckets() {
        let provider = MemProvider::new();
        let h = provider.histogram(MetricId::new("latency").buckets(vec![1.0, 2.0, 4.0]));
        h.observe(0.5);
        h.observe(1.5);
        h.observe(100.0); // overflow bucket
        assert_eq!(h.count(), 3);
    }

    #[test]
    fn test_histogram_empty_quantile_is_zero() {
        let provider = MemProvider::new();
        let h = provider.histogram(MetricId::new("latency"));
        assert_eq!(h.quantile(0.99), 0.0);
    }

    #[test]
    fn test_snapshot_covers_all_kinds() {
        let provider = MemProvider::new();
        provider.counter(MetricId::new("c")).with(&["k", "v"]).add(1.0);
        provider.gauge(MetricId::new("g")).set(2.0);
        provider.histogram(MetricId::new("h")).observe(3.0);

        let snapshot = provider.snapshot();
        assert_eq!(snapshot.counters.len(), 1);
        assert_eq!(snapshot.counters[0].labels, vec![("k".to_string(), "v".to_string())]);
        assert_eq!(snapshot.counters[0].value, 1.0);
        assert_eq!(snapshot.gauges.len(), 1);
        assert_eq!(snapshot.histograms.len(), 1);
        assert_eq!(snapshot.histograms[0].count, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let provider = MemProvider::new();
        provider.counter(MetricId::new("c")).add(1.0);
        let json = serde_json::to_string(&provider.snapshot()).unwrap();
        assert!(json.contains("\"counters\""));
    }

    #[test]
    fn test_concurrent_adds_sum_correctly() {
        let provider = MemProvider::new();
        let c = provider.counter(MetricId::new("c"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.add(1.0);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(c.value(), 8000.0);
    }
}
