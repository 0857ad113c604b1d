//! Execution context for algorithm runs.
//!
//! This module provides the [`Context`] which is passed to every algorithm
//! invocation. It carries the caller's opaque configuration record, the
//! step being executed, the active composite node, and the shared telemetry
//! sink and metrics accumulator.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::composite::Node;
use crate::events::{Event, EventSink, NoopSink};
use crate::metrics::EngineMetrics;
use crate::Record;

/// Position of the currently executing step in a sequential run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Zero-based index of the step.
    pub step_index: usize,
    /// Name of the step (the algorithm's metadata name).
    pub step_name: String,
    /// Number of steps in the run.
    pub total_steps: usize,
}

/// Context passed to every algorithm invocation.
///
/// The context is cheap to clone and thread-safe, allowing it to be handed
/// to concurrent branch tasks. Derived contexts (see [`Context::with_step`])
/// share the sink and metrics of their parent, so everything recorded during
/// one run lands in the same place.
///
/// # Example
///
/// ```rust
/// use algoflow::Context;
/// use serde_json::json;
///
/// let ctx = Context::new().with_value("tenant", json!("acme"));
/// assert_eq!(ctx.get("tenant"), Some(&json!("acme")));
/// assert!(ctx.step().is_none());
/// ```
#[derive(Clone)]
pub struct Context {
    values: Arc<Record>,
    step: Option<StepInfo>,
    composite: Option<Arc<Node>>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<Mutex<EngineMetrics>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values)
            .field("step", &self.step)
            .field("composite", &self.composite.is_some())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context with no values, a no-op sink and empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Arc::new(Record::new()),
            step: None,
            composite: None,
            sink: Arc::new(NoopSink),
            metrics: Arc::new(Mutex::new(EngineMetrics::default())),
        }
    }

    /// Replace the telemetry sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the caller record.
    #[must_use]
    pub fn with_values(mut self, values: Record) -> Self {
        self.values = Arc::new(values);
        self
    }

    /// Set a single key in the caller record.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value);
        self
    }

    /// Set the composite node read by [`composite::execute`](crate::composite::execute).
    #[must_use]
    pub fn with_composite(mut self, node: impl Into<Arc<Node>>) -> Self {
        self.composite = Some(node.into());
        self
    }

    /// Derive a sub-context for one step of a sequential run.
    ///
    /// The step position is available both as [`Context::step`] and under
    /// the `step_index`, `step_name` and `total_steps` keys of the record.
    #[must_use]
    pub fn with_step(&self, step: StepInfo) -> Self {
        let mut derived = self.clone();
        let values = Arc::make_mut(&mut derived.values);
        values.insert("step_index".to_string(), Value::from(step.step_index));
        values.insert("step_name".to_string(), Value::from(step.step_name.clone()));
        values.insert("total_steps".to_string(), Value::from(step.total_steps));
        derived.step = Some(step);
        derived
    }

    /// Look up a key in the caller record.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The full caller record.
    #[must_use]
    pub fn values(&self) -> &Record {
        &self.values
    }

    /// The step currently executing, if inside a sequential run.
    #[must_use]
    pub fn step(&self) -> Option<&StepInfo> {
        self.step.as_ref()
    }

    /// The active composite node, if one was set.
    #[must_use]
    pub fn composite(&self) -> Option<&Arc<Node>> {
        self.composite.as_ref()
    }

    /// Deliver a telemetry event to the sink.
    pub fn emit(&self, event: Event) {
        self.sink.emit(&event);
    }

    /// Increment the completed-units counter.
    pub fn record_unit(&self) {
        self.with_metrics(EngineMetrics::record_unit);
    }

    /// Record a failure message.
    pub fn record_failure(&self, error: impl Into<String>) {
        let error = error.into();
        self.with_metrics(|m| m.record_failure(error));
    }

    /// Record a branch timeout.
    pub fn record_timeout(&self) {
        self.with_metrics(EngineMetrics::record_timeout);
    }

    /// Record a captured panic.
    pub fn record_panic(&self) {
        self.with_metrics(EngineMetrics::record_panic);
    }

    /// Record that a fallback produced a stage's result.
    pub fn record_fallback(&self) {
        self.with_metrics(EngineMetrics::record_fallback);
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> EngineMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_metrics(&self, f: impl FnOnce(&mut EngineMetrics)) {
        let mut m = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut m);
    }
}
