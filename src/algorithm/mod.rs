//! Core algorithm trait and the executors built on it.
//!
//! This module defines the [`Algorithm`] trait, the unit of work every
//! executor runs, along with [`Lambda`] for closure-based units and
//! [`AlgorithmExt`] for hook sequencing and fluent composition.
//!
//! The default trait methods play the role of a base implementation: a
//! concrete unit only has to provide [`Algorithm::execute`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{Context, Error, Record, Result};

pub mod composite;
pub mod guard;
pub mod hybrid;
pub mod parallel;
pub mod sequential;

/// Shared handle to an algorithm. Executors hold these; they never own units.
pub type AlgorithmRef = Arc<dyn Algorithm>;

/// Descriptive information about an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Name used in step errors, telemetry and fallback lookup.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form extras.
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub extras: Record,
}

impl Metadata {
    /// Metadata with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            extras: Record::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a free-form extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

/// How a caller-level retry loop should treat a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

/// A unit's advice on what to do with one of its errors.
///
/// No executor acts on this by itself; it exists so a caller's retry loop
/// can ask the unit for its own policy.
#[derive(Debug)]
pub enum ErrorDecision {
    /// Try again with the given options.
    Retry(RetryOptions),
    /// Give up and surface the error.
    Fail(Error),
}

/// The fundamental trait for composable, async units of work.
///
/// An algorithm transforms an input record into an output record under a
/// shared [`Context`]. Implementations are stateless between invocations.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, Context, Result};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct Double;
///
/// #[async_trait]
/// impl Algorithm for Double {
///     async fn execute(&self, input: Value, _ctx: &Context) -> Result<Value> {
///         let value = input["value"].as_i64().unwrap_or_default();
///         Ok(json!({ "value": value * 2 }))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let out = Double.execute(json!({ "value": 4 }), &Context::new()).await.unwrap();
/// assert_eq!(out, json!({ "value": 8 }));
/// # });
/// ```
#[async_trait]
pub trait Algorithm: Send + Sync {
    /// Transform `input` into an output record.
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value>;

    /// Side-effect free preflight check. Defaults to always executable.
    fn can_execute(&self, _input: &Value, _ctx: &Context) -> bool {
        true
    }

    /// Descriptive metadata. The default name is the type name.
    fn metadata(&self) -> Metadata {
        Metadata::new(std::any::type_name::<Self>())
    }

    /// Hook run before [`Algorithm::execute`] by [`AlgorithmExt::run_with_hooks`].
    async fn before_execute(&self, input: Value, _ctx: &Context) -> Result<Value> {
        Ok(input)
    }

    /// Hook run after a successful [`Algorithm::execute`] by [`AlgorithmExt::run_with_hooks`].
    async fn after_execute(&self, output: Value, _ctx: &Context) -> Result<Value> {
        Ok(output)
    }

    /// Advise a caller-level retry loop. Defaults to failing.
    fn on_error(&self, error: Error, _ctx: &Context) -> ErrorDecision {
        ErrorDecision::Fail(error)
    }
}

#[async_trait]
impl<A> Algorithm for Arc<A>
where
    A: Algorithm + ?Sized,
{
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        (**self).execute(input, ctx).await
    }

    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        (**self).can_execute(input, ctx)
    }

    fn metadata(&self) -> Metadata {
        (**self).metadata()
    }

    async fn before_execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        (**self).before_execute(input, ctx).await
    }

    async fn after_execute(&self, output: Value, ctx: &Context) -> Result<Value> {
        (**self).after_execute(output, ctx).await
    }

    fn on_error(&self, error: Error, ctx: &Context) -> ErrorDecision {
        (**self).on_error(error, ctx)
    }
}

/// Extension methods available on every [`Algorithm`].
#[async_trait]
pub trait AlgorithmExt: Algorithm {
    /// Run `before_execute`, `execute` and `after_execute` in order,
    /// stopping at the first error.
    async fn run_with_hooks(&self, input: Value, ctx: &Context) -> Result<Value> {
        let input = self.before_execute(input, ctx).await?;
        let output = self.execute(input, ctx).await?;
        self.after_execute(output, ctx).await
    }

    /// The algorithm's metadata name.
    fn name(&self) -> String {
        self.metadata().name
    }

    /// Move this algorithm behind a shared handle.
    fn shared(self) -> AlgorithmRef
    where
        Self: Sized + 'static,
    {
        Arc::new(self)
    }

    /// Compose this algorithm with `next`, feeding this output into `next`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use algoflow::{Algorithm, AlgorithmExt, Context, Lambda};
    /// use serde_json::json;
    ///
    /// # tokio_test::block_on(async {
    /// let inc = Lambda::new("inc", |v| async move {
    ///     Ok::<_, algoflow::Error>(json!(v.as_i64().unwrap_or(0) + 1))
    /// });
    /// let triple = Lambda::new("triple", |v| async move {
    ///     Ok::<_, algoflow::Error>(json!(v.as_i64().unwrap_or(0) * 3))
    /// });
    ///
    /// let pipeline = inc.then(triple);
    /// let out = pipeline.execute(json!(1), &Context::new()).await.unwrap();
    /// assert_eq!(out, json!(6));
    /// # });
    /// ```
    fn then<B>(self, next: B) -> composite::Node
    where
        Self: Sized + 'static,
        B: Algorithm + 'static,
    {
        composite::Node::compose(self, next)
    }
}

impl<T: Algorithm + ?Sized> AlgorithmExt for T {}

type Precondition = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// An algorithm constructed from a name and an async closure.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, Context, Lambda};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let add_ten = Lambda::new("add_ten", |v| async move {
///     Ok::<_, algoflow::Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) + 10 }))
/// })
/// .with_precondition(|v| v.get("value").is_some());
///
/// assert!(add_ten.can_execute(&json!({ "value": 1 }), &Context::new()));
/// assert!(!add_ten.can_execute(&json!({}), &Context::new()));
/// # });
/// ```
pub struct Lambda<F> {
    name: String,
    description: Option<String>,
    precondition: Option<Precondition>,
    f: F,
}

impl<F, Fut> Lambda<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Create a new `Lambda` from the given closure.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: None,
            precondition: None,
            f,
        }
    }

    /// Set the description reported in metadata.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the `can_execute` check.
    #[must_use]
    pub fn with_precondition(
        mut self,
        precondition: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.precondition = Some(Arc::new(precondition));
        self
    }
}

impl<F> fmt::Debug for Lambda<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Algorithm for Lambda<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn execute(&self, input: Value, _ctx: &Context) -> Result<Value> {
        (self.f)(input).await
    }

    fn can_execute(&self, input: &Value, _ctx: &Context) -> bool {
        self.precondition.as_ref().map_or(true, |check| check(input))
    }

    fn metadata(&self) -> Metadata {
        let meta = Metadata::new(self.name.clone());
        match &self.description {
            Some(description) => meta.with_description(description.clone()),
            None => meta,
        }
    }
}
