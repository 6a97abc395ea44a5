//! Push-style metrics backend.
//!
//! Metric handles enqueue [`Sample`]s into a bounded channel; a background
//! tokio task drains the channel and hands batches to a [`Sink`] on a flush
//! interval. This is the shape StatsD-family emitters take: the sink owns
//! the socket, the provider owns the task, and instrumentation never blocks
//! on (or observes) network trouble.
//!
//! Sample names are pre-expanded with [`expand_name`], so dimension-naive
//! sinks receive one flat series name per label combination; the raw label
//! pairs ride along for sinks that can use them.

use crate::{expand_name, Counter, Gauge, Histogram, LabelValues, MetricId, Provider};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How a [`Sample`] should be applied by the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SampleKind {
    /// Counter increment (delta, non-negative).
    Add,
    /// Gauge assignment.
    Set,
    /// Gauge delta. Sinks without a native delta operation may emulate it
    /// with a local read; that emulation is not multi-process safe.
    Delta,
    /// Histogram observation.
    Observe,
}

/// One metric observation bound for the sink.
#[derive(Clone, Debug, Serialize)]
pub struct Sample {
    pub kind: SampleKind,
    /// Metric name with `{key}` placeholders already expanded.
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Error returned by a sink's emit. Only ever logged, never surfaced to the
/// code that recorded the observation.
#[derive(Debug, thiserror::Error)]
#[error("metric sink emission failed: {0}")]
pub struct SinkError(pub String);

/// Destination for flushed samples. Implementations own their transport
/// (socket, file, aggregation buffer) and are called from the provider's
/// background task only.
pub trait Sink: Send + Sync + 'static {
    fn emit(&self, batch: &[Sample]) -> Result<(), SinkError>;
}

/// Configuration for a [`PushProvider`].
#[derive(Clone, Debug)]
pub struct PushConfig {
    /// How often buffered samples are handed to the sink.
    pub flush_interval: Duration,
    /// Bounded queue capacity between handles and the flush task. When the
    /// queue is full, new samples are dropped (and the drop is counted).
    pub queue_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            queue_capacity: 4096,
        }
    }
}

/// How many dropped samples accumulate between overflow log lines.
const DROP_LOG_EVERY: u64 = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone)]
struct Emitter {
    tx: mpsc::Sender<Sample>,
    dropped: Arc<AtomicU64>,
}

impl Emitter {
    fn send(&self, sample: Sample) {
        if self.tx.try_send(sample).is_err() {
            // Queue full or provider stopped. Either way the observation is
            // expendable; count it and keep the caller unharmed.
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                tracing::warn!(dropped, "metric samples dropped (queue full or provider stopped)");
            }
        }
    }
}

/// Counter handle emitting into a [`PushProvider`] queue.
#[derive(Clone)]
pub struct PushCounter {
    id: Arc<MetricId>,
    labels: LabelValues,
    emitter: Emitter,
}

impl Counter for PushCounter {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            emitter: self.emitter.clone(),
        }
    }

    fn add(&self, delta: f64) {
        let delta = if delta < 0.0 {
            tracing::debug!(metric = %self.id.name, delta, "negative counter delta clamped to zero");
            0.0
        } else {
            delta
        };
        self.emitter.send(Sample {
            kind: SampleKind::Add,
            name: expand_name(&self.id.name, &self.labels),
            labels: self.labels.pairs().to_vec(),
            value: delta,
        });
    }
}

/// Gauge handle emitting into a [`PushProvider`] queue.
#[derive(Clone)]
pub struct PushGauge {
    id: Arc<MetricId>,
    labels: LabelValues,
    emitter: Emitter,
}

impl Gauge for PushGauge {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            emitter: self.emitter.clone(),
        }
    }

    fn set(&self, value: f64) {
        self.emitter.send(Sample {
            kind: SampleKind::Set,
            name: expand_name(&self.id.name, &self.labels),
            labels: self.labels.pairs().to_vec(),
            value,
        });
    }

    fn add(&self, delta: f64) {
        self.emitter.send(Sample {
            kind: SampleKind::Delta,
            name: expand_name(&self.id.name, &self.labels),
            labels: self.labels.pairs().to_vec(),
            value: delta,
        });
    }
}

/// Histogram handle emitting into a [`PushProvider`] queue.
#[derive(Clone)]
pub struct PushHistogram {
    id: Arc<MetricId>,
    labels: LabelValues,
    emitter: Emitter,
}

impl Histogram for PushHistogram {
    fn with(&self, labelvalues: &[&str]) -> Self {
        Self {
            id: Arc::clone(&self.id),
            labels: self.labels.with(labelvalues),
            emitter: self.emitter.clone(),
        }
    }

    fn observe(&self, value: f64) {
        self.emitter.send(Sample {
            kind: SampleKind::Observe,
            name: expand_name(&self.id.name, &self.labels),
            labels: self.labels.pairs().to_vec(),
            value,
        });
    }
}

/// [`Provider`] that batches samples and pushes them to a [`Sink`].
///
/// `stop()` only signals the flush task; the task then drains whatever is
/// still queued, performs a final emit, and exits, but `stop` itself returns
/// immediately. Callers that must not lose queued samples on exit await
/// [`join`](Self::join), which signals and then waits for that final flush.
/// Handles that outlive the provider keep working as no-ops (their sends are
/// counted as drops).
pub struct PushProvider<S: Sink> {
    emitter: Emitter,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
    _sink: std::marker::PhantomData<S>,
}

impl<S: Sink> PushProvider<S> {
    /// Spawns the flush task. Must be called within a tokio runtime.
    pub fn new(sink: S, config: PushConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(flush_loop(sink, rx, config, Arc::clone(&shutdown)));
        Self {
            emitter: Emitter {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            shutdown,
            worker: Mutex::new(Some(worker)),
            _sink: std::marker::PhantomData,
        }
    }

    /// Number of samples dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.emitter.dropped.load(Ordering::Relaxed)
    }

    /// Signals shutdown and waits for the final flush to complete. Unlike
    /// [`stop`](Provider::stop), when this returns every sample enqueued
    /// before the call has been offered to the sink.
    pub async fn join(&self) {
        self.shutdown.notify_one();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl<S: Sink> Provider for PushProvider<S> {
    type Counter = PushCounter;
    type Gauge = PushGauge;
    type Histogram = PushHistogram;

    fn counter(&self, id: MetricId) -> PushCounter {
        PushCounter {
            id: Arc::new(id),
            labels: LabelValues::default(),
            emitter: self.emitter.clone(),
        }
    }

    fn gauge(&self, id: MetricId) -> PushGauge {
        PushGauge {
            id: Arc::new(id),
            labels: LabelValues::default(),
            emitter: self.emitter.clone(),
        }
    }

    fn histogram(&self, id: MetricId) -> PushHistogram {
        PushHistogram {
            id: Arc::new(id),
            labels: LabelValues::default(),
            emitter: self.emitter.clone(),
        }
    }

    fn stop(&self) {
        self.shutdown.notify_one();
    }
}

async fn flush_loop<S: Sink>(
    sink: S,
    mut rx: mpsc::Receiver<Sample>,
    config: PushConfig,
    shutdown: Arc<Notify>,
) {
    let mut buffer: Vec<Sample> = Vec::new();
    let mut interval = tokio::time::interval(config.flush_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so the first real
    // flush happens one interval in.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                while let Ok(sample) = rx.try_recv() {
                    buffer.push(sample);
                }
                flush(&sink, &mut buffer);
                return;
            }
            _ = interval.tick() => {
                flush(&sink, &mut buffer);
            }
            received = rx.recv() => {
                match received {
                    Some(sample) => buffer.push(sample),
                    None => {
                        flush(&sink, &mut buffer);
                        return;
                    }
                }
            }
        }
    }
}

fn flush<S: Sink>(sink: &S, buffer: &mut Vec<Sample>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = sink.emit(buffer) {
        tracing::warn!(error = %e, samples = buffer.len(), "metric flush failed; samples discarded");
    }
    buffer.clear();
}
