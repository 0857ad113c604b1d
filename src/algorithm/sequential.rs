//! Sequential algorithm composition.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;

use super::guard::catch_panic;
use super::parallel::status;
use super::{Algorithm, AlgorithmExt, AlgorithmRef, Metadata};
use crate::context::StepInfo;
use crate::events::{Event, EventName, Measurements};
use crate::{Context, Error, Record, Result};

/// Runs algorithms one after another, feeding each output into the next.
///
/// Each step runs under a derived context carrying its [`StepInfo`]. The
/// first error stops the run and is wrapped in [`Error::Step`]; a panic
/// inside a step is captured and reported the same way.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, AlgorithmExt, Context, Error, Lambda, Sequential};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let double = Lambda::new("double", |v| async move {
///     Ok::<_, Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) * 2 }))
/// });
/// let add_ten = Lambda::new("add_ten", |v| async move {
///     Ok::<_, Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) + 10 }))
/// });
///
/// let pipeline = Sequential::new(vec![double.shared(), add_ten.shared()]);
/// let out = pipeline.execute(json!({ "value": 5 }), &Context::new()).await.unwrap();
/// assert_eq!(out, json!({ "value": 20 }));
/// # });
/// ```
#[derive(Clone)]
pub struct Sequential {
    algorithms: Vec<AlgorithmRef>,
}

impl Sequential {
    /// Create a sequential run over `algorithms`.
    #[must_use]
    pub fn new(algorithms: Vec<AlgorithmRef>) -> Self {
        Self { algorithms }
    }

    /// The steps, in execution order.
    #[must_use]
    pub fn algorithms(&self) -> &[AlgorithmRef] {
        &self.algorithms
    }
}

#[async_trait]
impl Algorithm for Sequential {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        if self.algorithms.is_empty() {
            return Ok(input);
        }

        let total_steps = self.algorithms.len();
        let mut metadata = Record::new();
        metadata.insert("total_steps".to_string(), json!(total_steps));
        ctx.emit(Event::start(EventName::Sequential, metadata.clone()));
        let started = Instant::now();

        let mut current = input;
        for (step_index, algorithm) in self.algorithms.iter().enumerate() {
            let step_name = algorithm.name();
            let step_ctx = ctx.with_step(StepInfo {
                step_index,
                step_name: step_name.clone(),
                total_steps,
            });

            let mut step_metadata = Record::new();
            step_metadata.insert("step_index".to_string(), json!(step_index));
            step_metadata.insert("step_name".to_string(), json!(step_name));
            ctx.emit(Event::start(EventName::SequentialStep, step_metadata.clone()));
            tracing::debug!(step_index, step_name = %step_name, total_steps, "sequential step started");
            let step_started = Instant::now();

            let result = catch_panic(algorithm.execute(current, &step_ctx)).await;
            let measurements = Measurements::elapsed(step_started.elapsed());
            step_metadata.insert("status".to_string(), json!(status(&result)));

            match result {
                Ok(output) => {
                    ctx.record_unit();
                    ctx.emit(Event::stop(EventName::SequentialStep, measurements, step_metadata));
                    current = output;
                }
                Err(error) => {
                    if let Error::Panicked { message } = &error {
                        ctx.record_panic();
                        tracing::warn!(step_index, step_name = %step_name, %message, "sequential step panicked");
                        ctx.emit(Event::exception(
                            EventName::SequentialStep,
                            measurements,
                            step_metadata,
                        ));
                    } else {
                        tracing::warn!(step_index, step_name = %step_name, error = %error, "sequential step failed");
                        ctx.emit(Event::stop(EventName::SequentialStep, measurements, step_metadata));
                    }
                    ctx.record_failure(format!("step {step_index} ({step_name}): {error}"));

                    metadata.insert("status".to_string(), json!("error"));
                    metadata.insert("failed_step".to_string(), json!(step_index));
                    ctx.emit(Event::stop(
                        EventName::Sequential,
                        Measurements::elapsed(started.elapsed()).with_counts(1, step_index),
                        metadata,
                    ));

                    return Err(Error::Step {
                        step_index,
                        algorithm: step_name.clone(),
                        step_name,
                        source: Box::new(error),
                    });
                }
            }
        }

        metadata.insert("status".to_string(), json!("ok"));
        ctx.emit(Event::stop(
            EventName::Sequential,
            Measurements::elapsed(started.elapsed()).with_counts(0, total_steps),
            metadata,
        ));
        Ok(current)
    }

    /// Every step must accept the original input; intermediate outputs are
    /// not simulated.
    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        self.algorithms
            .iter()
            .all(|algorithm| algorithm.can_execute(input, ctx))
    }

    fn metadata(&self) -> Metadata {
        Metadata::new("sequential")
            .with_description("Runs algorithms in order, threading each output into the next")
            .with_extra("steps", json!(self.algorithms.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MemorySink, Phase};
    use crate::Lambda;
    use std::sync::Arc;

    fn double() -> AlgorithmRef {
        Lambda::new("double", |v: Value| async move {
            Ok::<_, Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) * 2 }))
        })
        .shared()
    }

    fn add_ten() -> AlgorithmRef {
        Lambda::new("add_ten", |v: Value| async move {
            Ok::<_, Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) + 10 }))
        })
        .shared()
    }

    fn broken() -> AlgorithmRef {
        Lambda::new("broken", |_| async { Err::<Value, _>(Error::failed("nope")) }).shared()
    }

    #[tokio::test]
    async fn test_empty_list_is_identity() {
        let out = Sequential::new(Vec::new())
            .execute(json!({ "value": 1 }), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "value": 1 }));
    }

    #[tokio::test]
    async fn test_threads_output_left_to_right() {
        let out = Sequential::new(vec![double(), add_ten()])
            .execute(json!({ "value": 5 }), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "value": 20 }));

        let out = Sequential::new(vec![add_ten(), double()])
            .execute(json!({ "value": 5 }), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "value": 30 }));
    }

    #[tokio::test]
    async fn test_halts_on_first_error() {
        let ctx = Context::new();
        let err = Sequential::new(vec![double(), broken(), add_ten()])
            .execute(json!({ "value": 5 }), &ctx)
            .await
            .unwrap_err();

        match err {
            Error::Step {
                step_index,
                step_name,
                algorithm,
                source,
            } => {
                assert_eq!(step_index, 1);
                assert_eq!(step_name, "broken");
                assert_eq!(algorithm, "broken");
                assert!(matches!(*source, Error::Failed { .. }));
            }
            other => panic!("expected Step, got {other:?}"),
        }
        assert_eq!(ctx.snapshot().units_completed, 1);
    }

    #[tokio::test]
    async fn test_panic_is_wrapped_at_step_boundary() {
        let boom = Lambda::new("boom", |_| async {
            if true {
                panic!("step exploded");
            }
            Ok::<_, Error>(Value::Null)
        })
        .shared();

        let err = Sequential::new(vec![double(), boom])
            .execute(json!({ "value": 1 }), &Context::new())
            .await
            .unwrap_err();

        match err {
            Error::Step {
                step_index, source, ..
            } => {
                assert_eq!(step_index, 1);
                assert!(matches!(*source, Error::Panicked { ref message } if message == "step exploded"));
            }
            other => panic!("expected Step, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_steps_see_their_position() {
        let probe = Lambda::new("probe", |v| async move { Ok::<_, Error>(v) });

        struct Position;

        #[async_trait]
        impl Algorithm for Position {
            async fn execute(&self, _input: Value, ctx: &Context) -> Result<Value> {
                let step = ctx.step().cloned().ok_or("missing step")?;
                Ok(json!({
                    "index": step.step_index,
                    "name": step.step_name,
                    "total": step.total_steps,
                    "from_record": ctx.get("step_index").cloned(),
                }))
            }
        }

        let out = Sequential::new(vec![probe.shared(), Position.shared()])
            .execute(json!({}), &Context::new())
            .await
            .unwrap();
        assert_eq!(out["index"], 1);
        assert_eq!(out["total"], 2);
        assert_eq!(out["from_record"], 1);
        assert!(out["name"].as_str().unwrap().ends_with("Position"));
    }

    #[tokio::test]
    async fn test_emits_step_events() {
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        Sequential::new(vec![double(), add_ten()])
            .execute(json!({ "value": 1 }), &ctx)
            .await
            .unwrap();

        let steps = sink.filter(EventName::SequentialStep, Phase::Stop);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].metadata["step_name"], "add_ten");
        assert!(steps[1].measurements.duration_ms.is_some());
        assert_eq!(sink.filter(EventName::Sequential, Phase::Start).len(), 1);
    }

    #[test]
    fn test_can_execute_checks_original_input_only() {
        let needs_value = Lambda::new("needs_value", |v| async move { Ok::<_, Error>(v) })
            .with_precondition(|v| v.get("value").is_some())
            .shared();
        let seq = Sequential::new(vec![double(), needs_value]);
        let ctx = Context::new();
        assert!(seq.can_execute(&json!({ "value": 1 }), &ctx));
        assert!(!seq.can_execute(&json!({}), &ctx));
    }
}
