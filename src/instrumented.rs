//! Instrumented algorithm wrapper for automatic telemetry and metrics.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;

use crate::algorithm::guard::catch_panic;
use crate::events::{Event, EventName, Measurements};
use crate::{Algorithm, Context, Error, Metadata, Record, Result};

/// Wraps any algorithm with event emission and metric recording.
///
/// For each execution, `Instrumented` emits:
/// - An [`EventName::Algorithm`] start event before the inner algorithm runs
/// - A stop event with elapsed milliseconds and a `status` field
/// - An exception event instead of stop when the inner algorithm panics
///
/// # Example
///
/// ```rust
/// use algoflow::events::{EventName, MemorySink, Phase};
/// use algoflow::{Algorithm, Context, Instrumented, Lambda};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let inc = Lambda::new("inc", |v| async move {
///     Ok::<_, algoflow::Error>(json!(v.as_i64().unwrap_or(0) + 1))
/// });
/// let instrumented = Instrumented::new(inc, "Increment");
///
/// let sink = Arc::new(MemorySink::new());
/// let ctx = Context::new().with_sink(sink.clone());
/// assert_eq!(instrumented.execute(json!(5), &ctx).await.unwrap(), json!(6));
///
/// assert_eq!(sink.snapshot().len(), 2);
/// assert_eq!(sink.filter(EventName::Algorithm, Phase::Stop)[0].metadata["name"], "Increment");
/// # });
/// ```
pub struct Instrumented<A> {
    inner: A,
    name: String,
}

impl<A: Algorithm> Instrumented<A> {
    /// Wrap `inner`, labelling its telemetry `name`.
    pub fn new(inner: A, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }

    /// Access the inner algorithm.
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: Algorithm> Algorithm for Instrumented<A> {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        let mut metadata = Record::new();
        metadata.insert("name".to_string(), json!(self.name));
        ctx.emit(Event::start(EventName::Algorithm, metadata.clone()));

        let start = Instant::now();
        let result = catch_panic(self.inner.execute(input, ctx)).await;
        let measurements = Measurements::elapsed(start.elapsed());

        match &result {
            Ok(_) => {
                ctx.record_unit();
                metadata.insert("status".to_string(), json!("ok"));
                ctx.emit(Event::stop(EventName::Algorithm, measurements, metadata));
            }
            Err(Error::Panicked { message }) => {
                ctx.record_panic();
                ctx.record_failure(format!("{}: panicked: {message}", self.name));
                metadata.insert("status".to_string(), json!("panic"));
                metadata.insert("error".to_string(), json!(message));
                ctx.emit(Event::exception(EventName::Algorithm, measurements, metadata));
            }
            Err(e) => {
                ctx.record_failure(format!("{}: {e}", self.name));
                metadata.insert("status".to_string(), json!("error"));
                metadata.insert("error".to_string(), e.to_value());
                ctx.emit(Event::stop(EventName::Algorithm, measurements, metadata));
            }
        }

        result
    }

    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        self.inner.can_execute(input, ctx)
    }

    fn metadata(&self) -> Metadata {
        let mut meta = self.inner.metadata();
        meta.name = self.name.clone();
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MemorySink, Phase};
    use crate::Lambda;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_failure_is_recorded_and_returned() {
        let failing = Lambda::new("failing", |_| async { Err::<Value, _>(Error::failed("bad input")) });
        let instrumented = Instrumented::new(failing, "Checker");
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        let err = instrumented.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Failed { .. }));

        let stops = sink.filter(EventName::Algorithm, Phase::Stop);
        assert_eq!(stops[0].metadata["status"], "error");
        assert_eq!(ctx.snapshot().failures, vec!["Checker: algorithm failed: \"bad input\"".to_string()]);
    }

    #[tokio::test]
    async fn test_panic_emits_exception() {
        let boom = Lambda::new("boom", |_| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, Error>(Value::Null)
        });
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        let err = Instrumented::new(boom, "Boom").execute(json!(1), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Panicked { .. }));
        assert_eq!(sink.filter(EventName::Algorithm, Phase::Exception).len(), 1);
        assert_eq!(ctx.snapshot().panics, 1);
    }

    #[test]
    fn test_metadata_uses_label() {
        let inner = Lambda::new("raw", |v| async move { Ok::<_, Error>(v) }).with_description("passes through");
        let meta = Instrumented::new(inner, "Labelled").metadata();
        assert_eq!(meta.name, "Labelled");
        assert_eq!(meta.description.as_deref(), Some("passes through"));
    }
}
