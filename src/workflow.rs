//! High-level workflow container with automatic metrics collection.

use serde_json::Value;

use crate::{Algorithm, Context, EngineMetrics, Result};

/// A high-level wrapper that runs an algorithm and collects execution metrics.
///
/// `Workflow` owns an algorithm, creates a fresh [`Context`] for each run,
/// and returns both the output and the accumulated [`EngineMetrics`].
///
/// # Example
///
/// ```rust
/// use algoflow::{AlgorithmExt, Lambda, Workflow};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let double = Lambda::new("double", |v| async move {
///     Ok::<_, algoflow::Error>(json!(v.as_i64().unwrap_or(0) * 2))
/// });
/// let add_ten = Lambda::new("add_ten", |v| async move {
///     Ok::<_, algoflow::Error>(json!(v.as_i64().unwrap_or(0) + 10))
/// });
///
/// let workflow = Workflow::new(double.then(add_ten)).with_name("DoubleAndAdd");
/// let (result, metrics) = workflow.run(json!(5)).await.unwrap();
/// assert_eq!(result, json!(20));
/// assert_eq!(metrics.units_completed, 2);
/// # });
/// ```
pub struct Workflow<A> {
    algorithm: A,
    name: String,
}

impl<A: Algorithm> Workflow<A> {
    /// Create a new workflow wrapping the given algorithm.
    pub fn new(algorithm: A) -> Self {
        Self {
            algorithm,
            name: "workflow".to_string(),
        }
    }

    /// Set a human-readable name for this workflow.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the name of this workflow.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the workflow under a fresh [`Context`], returning the output along
    /// with the collected metrics.
    pub async fn run(&self, input: Value) -> Result<(Value, EngineMetrics)> {
        let ctx = Context::new();
        let output = self.run_with_ctx(&ctx, input).await?;
        Ok((output, ctx.snapshot()))
    }

    /// Run the workflow with a caller-provided context.
    ///
    /// Useful for sharing a sink or metrics across several runs, or for
    /// supplying a composite tree to [`crate::composite::execute`].
    pub async fn run_with_ctx(&self, ctx: &Context, input: Value) -> Result<Value> {
        tracing::debug!(workflow = %self.name, "workflow started");
        let result = self.algorithm.execute(input, ctx).await;
        if let Err(error) = &result {
            tracing::warn!(workflow = %self.name, error = %error, "workflow failed");
        }
        result
    }

    /// Access the inner algorithm.
    pub fn inner(&self) -> &A {
        &self.algorithm
    }

    /// Consume the workflow, returning the inner algorithm.
    pub fn into_inner(self) -> A {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlgorithmExt, Error, Lambda, Sequential};
    use serde_json::json;

    #[tokio::test]
    async fn test_each_run_gets_fresh_metrics() {
        let step = Lambda::new("id", |v| async move { Ok::<_, Error>(v) });
        let workflow = Workflow::new(Sequential::new(vec![step.shared()]));

        let (_, first) = workflow.run(json!(1)).await.unwrap();
        let (_, second) = workflow.run(json!(2)).await.unwrap();
        assert_eq!(first.units_completed, 1);
        assert_eq!(second.units_completed, 1);
    }

    #[tokio::test]
    async fn test_shared_context_accumulates() {
        let step = Lambda::new("id", |v| async move { Ok::<_, Error>(v) });
        let workflow = Workflow::new(Sequential::new(vec![step.shared()])).with_name("shared");
        let ctx = Context::new();

        workflow.run_with_ctx(&ctx, json!(1)).await.unwrap();
        workflow.run_with_ctx(&ctx, json!(2)).await.unwrap();
        assert_eq!(ctx.snapshot().units_completed, 2);
        assert_eq!(workflow.name(), "shared");
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let step = Lambda::new("bad", |_| async { Err::<Value, _>(Error::failed("nope")) });
        let err = Workflow::new(step).run(json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Failed { .. }));
    }
}
