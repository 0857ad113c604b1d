//! Structural combinators over algorithms.
//!
//! A [`Node`] is an immutable expression tree whose leaves are arbitrary
//! algorithms and whose interior nodes are sequence, parallel, choice,
//! repeat, conditional and compose combinators. Every node is itself an
//! [`Algorithm`], so trees nest to any depth and can be handed to any
//! executor.
//!
//! # Example
//!
//! ```rust
//! use algoflow::composite::{Condition, Node, RepeatOptions};
//! use algoflow::{Algorithm, AlgorithmExt, Context, Error, Lambda};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let double = Lambda::new("double", |v| async move {
//!     Ok::<_, Error>(json!({ "value": v["value"].as_i64().unwrap_or(0) * 2 }))
//! });
//!
//! let until_hundred = Node::repeat(
//!     double,
//!     RepeatOptions::default()
//!         .with_times(100)
//!         .with_while(|v| v["value"].as_i64().unwrap_or(0) < 100),
//! );
//!
//! let out = until_hundred.execute(json!({ "value": 1 }), &Context::new()).await.unwrap();
//! assert_eq!(out, json!({ "value": 128 }));
//! # });
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::parallel::{status, Parallel, ParallelOptions};
use super::sequential::Sequential;
use super::{Algorithm, AlgorithmRef, Metadata};
use crate::events::{Event, EventName, Measurements};
use crate::{Context, Record, Result};

/// Hard cap on repeat iterations when none is configured.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A test over an input record.
#[derive(Clone)]
pub enum Condition {
    /// An arbitrary predicate.
    Predicate(ValuePredicate),
    /// Partial match: every declared key must be present in the input with
    /// an equal value. Extra input keys are ignored.
    Matches(Record),
}

impl Condition {
    /// Wrap a closure as a condition.
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Match against the given key-value pairs.
    #[must_use]
    pub fn matches(pattern: Record) -> Self {
        Self::Matches(pattern)
    }

    /// Evaluate the condition against `input`.
    #[must_use]
    pub fn evaluate(&self, input: &Value) -> bool {
        match self {
            Self::Predicate(f) => f(input),
            Self::Matches(pattern) => input.as_object().is_some_and(|record| {
                pattern
                    .iter()
                    .all(|(key, expected)| record.get(key) == Some(expected))
            }),
        }
    }
}

impl From<Record> for Condition {
    fn from(pattern: Record) -> Self {
        Self::Matches(pattern)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
            Self::Matches(pattern) => f.debug_tuple("Matches").field(pattern).finish(),
        }
    }
}

/// Iteration policy for [`Node::Repeat`].
#[derive(Clone)]
pub struct RepeatOptions {
    /// Number of iterations to run.
    pub times: usize,
    /// Checked after each iteration; the loop stops once it returns false.
    pub while_cond: Option<ValuePredicate>,
    /// Absolute iteration cap, applied even if `while_cond` never turns false.
    pub max_iterations: usize,
}

impl Default for RepeatOptions {
    fn default() -> Self {
        Self {
            times: 1,
            while_cond: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl RepeatOptions {
    /// Set the iteration count.
    #[must_use]
    pub fn with_times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    /// Keep iterating only while `f(output)` holds.
    #[must_use]
    pub fn with_while(mut self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.while_cond = Some(Arc::new(f));
        self
    }

    /// Set the hard iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl fmt::Debug for RepeatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatOptions")
            .field("times", &self.times)
            .field("while_cond", &self.while_cond.is_some())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

/// A node in a composite expression tree.
#[derive(Clone)]
pub enum Node {
    /// Run children in order, threading output to input.
    Sequence(Sequential),
    /// Run children concurrently against the same input.
    Parallel(Parallel),
    /// Run `if_true` when the predicate holds for the input, else `if_false`.
    Choice {
        /// Decides the branch.
        predicate: Condition,
        /// Taken when the predicate holds.
        if_true: AlgorithmRef,
        /// Taken otherwise.
        if_false: AlgorithmRef,
    },
    /// Run `body` repeatedly, threading output to input.
    Repeat {
        /// The repeated algorithm.
        body: AlgorithmRef,
        /// Iteration policy.
        options: RepeatOptions,
    },
    /// Run `body` only when the condition holds; otherwise pass input through.
    When {
        /// Guard over the input.
        condition: Condition,
        /// The guarded algorithm.
        body: AlgorithmRef,
    },
    /// `first` then `second`; equivalent to a two-element sequence.
    Compose {
        /// Runs first.
        first: AlgorithmRef,
        /// Receives the output of `first`.
        second: AlgorithmRef,
    },
}

impl Node {
    /// A sequence over `children`.
    #[must_use]
    pub fn sequence(children: Vec<AlgorithmRef>) -> Self {
        Self::Sequence(Sequential::new(children))
    }

    /// A parallel fan-out over `children`.
    #[must_use]
    pub fn parallel(children: Vec<AlgorithmRef>, options: ParallelOptions) -> Self {
        Self::Parallel(Parallel::with_options(children, options))
    }

    /// A two-way choice.
    pub fn choice(
        predicate: impl Into<Condition>,
        if_true: impl Algorithm + 'static,
        if_false: impl Algorithm + 'static,
    ) -> Self {
        Self::Choice {
            predicate: predicate.into(),
            if_true: Arc::new(if_true),
            if_false: Arc::new(if_false),
        }
    }

    /// A repeat loop.
    pub fn repeat(body: impl Algorithm + 'static, options: RepeatOptions) -> Self {
        Self::Repeat {
            body: Arc::new(body),
            options,
        }
    }

    /// A guarded algorithm.
    pub fn when(condition: impl Into<Condition>, body: impl Algorithm + 'static) -> Self {
        Self::When {
            condition: condition.into(),
            body: Arc::new(body),
        }
    }

    /// `first` then `second`.
    pub fn compose(first: impl Algorithm + 'static, second: impl Algorithm + 'static) -> Self {
        Self::Compose {
            first: Arc::new(first),
            second: Arc::new(second),
        }
    }

    /// The node type as used in telemetry.
    #[must_use]
    pub fn node_type(&self) -> &'static str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::Parallel(_) => "parallel",
            Self::Choice { .. } => "choice",
            Self::Repeat { .. } => "repeat",
            Self::When { .. } => "when",
            Self::Compose { .. } => "compose",
        }
    }

    async fn dispatch(&self, input: Value, ctx: &Context) -> Result<Value> {
        match self {
            Self::Sequence(sequence) => sequence.execute(input, ctx).await,
            Self::Parallel(parallel) => parallel.execute(input, ctx).await,
            Self::Choice {
                predicate,
                if_true,
                if_false,
            } => {
                let taken = predicate.evaluate(&input);
                tracing::debug!(taken, "choice resolved");
                if taken {
                    if_true.execute(input, ctx).await
                } else {
                    if_false.execute(input, ctx).await
                }
            }
            Self::Repeat { body, options } => repeat(body, options, input, ctx).await,
            Self::When { condition, body } => {
                if condition.evaluate(&input) {
                    body.execute(input, ctx).await
                } else {
                    Ok(input)
                }
            }
            Self::Compose { first, second } => {
                Sequential::new(vec![Arc::clone(first), Arc::clone(second)])
                    .execute(input, ctx)
                    .await
            }
        }
    }
}

async fn repeat(
    body: &AlgorithmRef,
    options: &RepeatOptions,
    input: Value,
    ctx: &Context,
) -> Result<Value> {
    let limit = options.times.min(options.max_iterations);
    let mut current = input;
    let mut iterations = 0;

    while iterations < limit {
        current = body.execute(current, ctx).await?;
        iterations += 1;

        if let Some(keep_going) = &options.while_cond {
            if !keep_going(&current) {
                tracing::debug!(iterations, "repeat condition no longer holds");
                return Ok(current);
            }
        }
    }

    if options.times > options.max_iterations {
        tracing::warn!(
            iterations,
            max_iterations = options.max_iterations,
            "repeat stopped at iteration cap"
        );
    }
    Ok(current)
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.node_type())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Algorithm for Node {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        let mut metadata = Record::new();
        metadata.insert("node_type".to_string(), json!(self.node_type()));
        ctx.emit(Event::start(EventName::Composite, metadata.clone()));
        let started = Instant::now();

        let result = self.dispatch(input, ctx).await;

        metadata.insert("status".to_string(), json!(status(&result)));
        ctx.emit(Event::stop(
            EventName::Composite,
            Measurements::elapsed(started.elapsed()),
            metadata,
        ));
        result
    }

    /// Mirrors the executor each node delegates to. A choice is always
    /// executable because its branch is resolved lazily.
    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        match self {
            Self::Sequence(sequence) => sequence.can_execute(input, ctx),
            Self::Parallel(parallel) => parallel.can_execute(input, ctx),
            Self::Choice { .. } => true,
            Self::Repeat { body, .. } | Self::When { body, .. } => body.can_execute(input, ctx),
            Self::Compose { first, second } => {
                first.can_execute(input, ctx) && second.can_execute(input, ctx)
            }
        }
    }

    fn metadata(&self) -> Metadata {
        Metadata::new(format!("composite.{}", self.node_type()))
    }
}

/// Run the composite node stored in the context, or pass `input` through
/// unchanged when there is none.
pub async fn execute(input: Value, ctx: &Context) -> Result<Value> {
    match ctx.composite() {
        Some(node) => node.execute(input, ctx).await,
        None => Ok(input),
    }
}

/// Preflight check for the composite node stored in the context; true when
/// there is none.
#[must_use]
pub fn can_execute(input: &Value, ctx: &Context) -> bool {
    ctx.composite()
        .map_or(true, |node| node.can_execute(input, ctx))
}
