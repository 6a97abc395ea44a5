use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-call context: an optional deadline plus an immutable chain of typed
/// values.
///
/// A `Context` is cheap to clone and derive. Deriving never mutates the
/// parent: `with_timeout`/`with_deadline` produce a child whose deadline is
/// the *earlier* of the parent's and the new one, and `with_value` prepends
/// to a shared value chain. Middlewares use the value chain to carry
/// call-scoped data (trace identity) without the endpoint signature knowing
/// about it.
///
/// Cancellation itself is the runtime's: dropping the future of a call
/// abandons it. The deadline here is the cooperative part; retry and
/// transport code bound their waits with `remaining()`.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    values: Option<Arc<ValueNode>>,
}

struct ValueNode {
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

impl Context {
    /// A context with no deadline and no values.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child whose deadline is `min(parent deadline, deadline)`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            deadline: Some(deadline),
            values: self.values.clone(),
        }
    }

    /// Derives a child whose deadline is `min(parent deadline, now + timeout)`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child carrying `value`, retrievable by its type. A later
    /// value of the same type shadows an earlier one.
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        Self {
            deadline: self.deadline,
            values: Some(Arc::new(ValueNode {
                value: Arc::new(value),
                parent: self.values.clone(),
            })),
        }
    }

    /// The most recently attached value of type `T`, if any.
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let mut node = self.values.as_ref();
        while let Some(n) = node {
            if let Ok(v) = Arc::clone(&n.value).downcast::<T>() {
                return Some(v);
            }
            node = n.parent.as_ref();
        }
        None
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time until the deadline; `None` when there is no deadline,
    /// `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}
