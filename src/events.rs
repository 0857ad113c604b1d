//! Structured telemetry events emitted by the executors.
//!
//! Every executor reports start/stop (and exception) events at fixed points:
//! overall start/stop, per step for sequential runs, per task for parallel
//! runs, per stage for hybrid pipelines and per node type for composites.
//! Events are delivered to an [`EventSink`]; the crate never decides where
//! they end up.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Record;

/// Which boundary an event was emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// A whole sequential run.
    Sequential,
    /// One step of a sequential run.
    SequentialStep,
    /// A whole parallel run.
    Parallel,
    /// One branch task of a parallel run.
    ParallelTask,
    /// A whole hybrid pipeline.
    Hybrid,
    /// One stage of a hybrid pipeline.
    HybridStage,
    /// A composite node; the node type is in the metadata.
    Composite,
    /// A unit wrapped in [`Instrumented`](crate::Instrumented).
    Algorithm,
}

/// Lifecycle phase of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Work is about to begin.
    Start,
    /// Work finished, successfully or with an error result.
    Stop,
    /// Work ended with a captured panic.
    Exception,
}

/// Numeric measurements attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurements {
    /// Elapsed time in milliseconds; absent on start events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
    /// Number of failed units or branches, where meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,
    /// Number of successful units or branches, where meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_count: Option<usize>,
}

impl Measurements {
    /// Measurements carrying only an elapsed duration.
    #[must_use]
    pub fn elapsed(duration: Duration) -> Self {
        Self {
            duration_ms: Some(duration.as_millis()),
            ..Self::default()
        }
    }

    /// Attach error and success counts.
    #[must_use]
    pub fn with_counts(mut self, errors: usize, successes: usize) -> Self {
        self.error_count = Some(errors);
        self.success_count = Some(successes);
        self
    }
}

/// A single telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The boundary that emitted the event.
    pub name: EventName,
    /// Start, stop or exception.
    pub phase: Phase,
    /// Numeric measurements.
    pub measurements: Measurements,
    /// Contextual identifiers such as step index, algorithm name and status.
    pub metadata: Record,
}

impl Event {
    /// A start event with the given metadata.
    #[must_use]
    pub fn start(name: EventName, metadata: Record) -> Self {
        Self {
            name,
            phase: Phase::Start,
            measurements: Measurements::default(),
            metadata,
        }
    }

    /// A stop event with the given measurements and metadata.
    #[must_use]
    pub fn stop(name: EventName, measurements: Measurements, metadata: Record) -> Self {
        Self {
            name,
            phase: Phase::Stop,
            measurements,
            metadata,
        }
    }

    /// An exception event with the given measurements and metadata.
    #[must_use]
    pub fn exception(name: EventName, measurements: Measurements, metadata: Record) -> Self {
        Self {
            name,
            phase: Phase::Exception,
            measurements,
            metadata,
        }
    }
}

/// A timestamped trace entry containing an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u128,
    /// The event that was recorded.
    #[serde(flatten)]
    pub event: Event,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: Event) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

/// Receiver for telemetry events.
///
/// Implementations must be cheap and non-blocking: events are emitted
/// inline from executor code, including from concurrent branch tasks.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}

/// Forwards events to `tracing` at debug level (exceptions at warn).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        let metadata = serde_json::Value::Object(event.metadata.clone());
        match event.phase {
            Phase::Exception => tracing::warn!(
                event = ?event.name,
                duration_ms = ?event.measurements.duration_ms,
                %metadata,
                "algorithm exception"
            ),
            phase => tracing::debug!(
                event = ?event.name,
                ?phase,
                duration_ms = ?event.measurements.duration_ms,
                error_count = ?event.measurements.error_count,
                %metadata,
                "algorithm telemetry"
            ),
        }
    }
}

/// Keeps every event in memory as a timestamped trace log.
///
/// # Example
///
/// ```rust
/// use algoflow::events::{Event, EventName, EventSink, MemorySink};
///
/// let sink = MemorySink::new();
/// sink.emit(&Event::start(EventName::Sequential, Default::default()));
/// assert_eq!(sink.snapshot().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<TraceEntry>>,
}

impl MemorySink {
    /// Create an empty trace log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all trace entries recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries matching the given name and phase, in emission order.
    #[must_use]
    pub fn filter(&self, name: EventName, phase: Phase) -> Vec<Event> {
        self.snapshot()
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| event.name == name && event.phase == phase)
            .collect()
    }

    /// Clear all trace entries.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TraceEntry::new(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_entry_serialization() {
        let mut metadata = Record::new();
        metadata.insert("step_name".to_string(), json!("Summarize"));
        let entry = TraceEntry::new(Event::start(EventName::SequentialStep, metadata));

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"name\":\"sequential_step\""));
        assert!(json.contains("\"phase\":\"start\""));
        assert!(json.contains("\"step_name\":\"Summarize\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_stop_measurements_skip_absent_fields() {
        let event = Event::stop(
            EventName::Parallel,
            Measurements::elapsed(Duration::from_millis(12)).with_counts(1, 3),
            Record::new(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["measurements"]["duration_ms"], 12);
        assert_eq!(json["measurements"]["error_count"], 1);
        assert_eq!(json["measurements"]["success_count"], 3);

        let start = serde_json::to_value(Event::start(EventName::Parallel, Record::new())).unwrap();
        assert_eq!(start["measurements"], json!({}));
    }

    #[test]
    fn test_memory_sink_filter_and_clear() {
        let sink = MemorySink::new();
        sink.emit(&Event::start(EventName::Hybrid, Record::new()));
        sink.emit(&Event::stop(EventName::Hybrid, Measurements::default(), Record::new()));
        sink.emit(&Event::start(EventName::HybridStage, Record::new()));

        assert_eq!(sink.filter(EventName::Hybrid, Phase::Start).len(), 1);
        assert_eq!(sink.filter(EventName::HybridStage, Phase::Stop).len(), 0);

        sink.clear();
        assert!(sink.snapshot().is_empty());
    }
}
