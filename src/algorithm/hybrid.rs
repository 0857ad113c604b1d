//! Multi-stage pipelines with per-unit fallback chains.
//!
//! A [`Hybrid`] pipeline is an ordered list of [`Stage`]s. Each stage runs
//! its algorithms either sequentially or in parallel, and the stage output
//! becomes the next stage's input. Primary algorithms listed in the fallback
//! table are wrapped in [`WithFallbacks`] before their stage runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::guard::catch_panic;
use super::parallel::{status, ErrorMode, MergeStrategy, Parallel, ParallelOptions};
use super::sequential::Sequential;
use super::{Algorithm, AlgorithmExt, AlgorithmRef, Metadata};
use crate::events::{Event, EventName, Measurements};
use crate::{Context, Error, Record, Result};

/// How a stage runs its algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// One after another.
    #[default]
    Sequential,
    /// Concurrently, against the same input.
    Parallel,
}

/// One group of algorithms in a hybrid pipeline.
#[derive(Clone)]
pub struct Stage {
    /// The stage's algorithms.
    pub algorithms: Vec<AlgorithmRef>,
    /// Sequential or parallel.
    pub mode: StageMode,
    /// Policy used when `mode` is parallel.
    pub options: ParallelOptions,
}

impl Stage {
    /// A sequential stage.
    #[must_use]
    pub fn sequential(algorithms: Vec<AlgorithmRef>) -> Self {
        Self {
            algorithms,
            mode: StageMode::Sequential,
            options: ParallelOptions::default(),
        }
    }

    /// A parallel stage with default options.
    #[must_use]
    pub fn parallel(algorithms: Vec<AlgorithmRef>) -> Self {
        Self {
            algorithms,
            mode: StageMode::Parallel,
            options: ParallelOptions::default(),
        }
    }

    /// Set the merge strategy used in parallel mode.
    #[must_use]
    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> Self {
        self.options.merge_strategy = merge_strategy;
        self
    }

    /// Set the error mode used in parallel mode.
    #[must_use]
    pub fn with_error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.options.error_mode = error_mode;
        self
    }

    /// Replace the parallel options wholesale.
    #[must_use]
    pub fn with_options(mut self, options: ParallelOptions) -> Self {
        self.options = options;
        self
    }

    fn mode_name(&self) -> &'static str {
        match self.mode {
            StageMode::Sequential => "sequential",
            StageMode::Parallel => "parallel",
        }
    }
}

impl From<AlgorithmRef> for Stage {
    fn from(algorithm: AlgorithmRef) -> Self {
        Self::sequential(vec![algorithm])
    }
}

impl From<Vec<AlgorithmRef>> for Stage {
    fn from(algorithms: Vec<AlgorithmRef>) -> Self {
        Self::sequential(algorithms)
    }
}

/// Runs a primary algorithm and, if it fails, each fallback in turn against
/// the same input until one succeeds.
///
/// Panics in the primary or a fallback count as failures and move on to the
/// next candidate.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, AlgorithmExt, Context, Error, Lambda, WithFallbacks};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let primary = Lambda::new("primary", |_| async { Err::<serde_json::Value, _>(Error::failed("down")) });
/// let backup = Lambda::new("backup", |_| async { Ok::<_, Error>(json!({ "source": "backup" })) });
///
/// let guarded = WithFallbacks::new(primary.shared(), vec![backup.shared()]);
/// let out = guarded.execute(json!({}), &Context::new()).await.unwrap();
/// assert_eq!(out, json!({ "source": "backup" }));
/// # });
/// ```
#[derive(Clone)]
pub struct WithFallbacks {
    primary: AlgorithmRef,
    fallbacks: Vec<AlgorithmRef>,
}

impl WithFallbacks {
    /// Guard `primary` with an ordered fallback chain.
    #[must_use]
    pub fn new(primary: AlgorithmRef, fallbacks: Vec<AlgorithmRef>) -> Self {
        Self { primary, fallbacks }
    }
}

#[async_trait]
impl Algorithm for WithFallbacks {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        let primary_name = self.primary.name();
        let primary_error = match catch_panic(self.primary.execute(input.clone(), ctx)).await {
            Ok(output) => return Ok(output),
            Err(error) => error,
        };
        tracing::warn!(
            algorithm = %primary_name,
            error = %primary_error,
            fallbacks = self.fallbacks.len(),
            "primary failed, trying fallbacks"
        );

        let mut attempts = vec![primary_error];
        for (position, fallback) in self.fallbacks.iter().enumerate() {
            match catch_panic(fallback.execute(input.clone(), ctx)).await {
                Ok(output) => {
                    tracing::info!(
                        algorithm = %primary_name,
                        fallback = %fallback.name(),
                        position,
                        "fallback succeeded"
                    );
                    ctx.record_fallback();
                    return Ok(output);
                }
                Err(error) => {
                    tracing::debug!(
                        algorithm = %primary_name,
                        fallback = %fallback.name(),
                        error = %error,
                        "fallback failed"
                    );
                    attempts.push(error);
                }
            }
        }

        Err(Error::AllFallbacksFailed {
            algorithm: primary_name,
            attempts,
        })
    }

    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        self.primary.can_execute(input, ctx)
    }

    /// Reports as the primary so step names and telemetry stay stable.
    fn metadata(&self) -> Metadata {
        self.primary
            .metadata()
            .with_extra("fallbacks", json!(self.fallbacks.len()))
    }
}

/// An ordered multi-stage pipeline.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, AlgorithmExt, Context, Error, Hybrid, Lambda, Stage};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let fetch = Lambda::new("fetch", |_| async { Err::<serde_json::Value, _>(Error::failed("offline")) });
/// let cache = Lambda::new("cache", |_| async { Ok::<_, Error>(json!({ "doc": "cached" })) });
/// let a = Lambda::new("a", |v| async move { Ok::<_, Error>(json!({ "a": v["doc"].clone() })) });
/// let b = Lambda::new("b", |v| async move { Ok::<_, Error>(json!({ "b": v["doc"].clone() })) });
///
/// let pipeline = Hybrid::new(vec![
///     Stage::from(fetch.shared()),
///     Stage::parallel(vec![a.shared(), b.shared()]),
/// ])
/// .with_fallbacks("fetch", vec![cache.shared()]);
///
/// let out = pipeline.execute(json!({}), &Context::new()).await.unwrap();
/// assert_eq!(out, json!({ "a": "cached", "b": "cached" }));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct Hybrid {
    stages: Vec<Stage>,
    fallbacks: HashMap<String, Vec<AlgorithmRef>>,
}

impl Hybrid {
    /// A pipeline over `stages`, in execution order.
    #[must_use]
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            fallbacks: HashMap::new(),
        }
    }

    /// Register a fallback chain for the primary algorithm named `primary`.
    ///
    /// Algorithms are matched by their metadata name.
    #[must_use]
    pub fn with_fallbacks(
        mut self,
        primary: impl Into<String>,
        fallbacks: Vec<AlgorithmRef>,
    ) -> Self {
        self.fallbacks.insert(primary.into(), fallbacks);
        self
    }

    /// Register a fallback chain for `primary`, keyed by its metadata name.
    #[must_use]
    pub fn with_fallbacks_for(self, primary: &AlgorithmRef, fallbacks: Vec<AlgorithmRef>) -> Self {
        let name = primary.name();
        self.with_fallbacks(name, fallbacks)
    }

    /// The pipeline stages.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Substitute fallback-guarded wrappers for primaries in the table.
    fn resolve(&self, stage: &Stage) -> Vec<AlgorithmRef> {
        stage
            .algorithms
            .iter()
            .map(|algorithm| match self.fallbacks.get(&algorithm.name()) {
                Some(chain) if !chain.is_empty() => {
                    Arc::new(WithFallbacks::new(Arc::clone(algorithm), chain.clone()))
                        as AlgorithmRef
                }
                _ => Arc::clone(algorithm),
            })
            .collect()
    }

    async fn run_stage(&self, stage: &Stage, input: Value, ctx: &Context) -> Result<Value> {
        let algorithms = self.resolve(stage);
        match stage.mode {
            StageMode::Sequential => Sequential::new(algorithms).execute(input, ctx).await,
            StageMode::Parallel => {
                Parallel::with_options(algorithms, stage.options.clone())
                    .execute(input, ctx)
                    .await
            }
        }
    }
}

#[async_trait]
impl Algorithm for Hybrid {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        if self.stages.is_empty() {
            return Ok(input);
        }

        let total_stages = self.stages.len();
        let mut metadata = Record::new();
        metadata.insert("total_stages".to_string(), json!(total_stages));
        ctx.emit(Event::start(EventName::Hybrid, metadata.clone()));
        let started = Instant::now();

        let mut current = input;
        for (stage_index, stage) in self.stages.iter().enumerate() {
            let mut stage_metadata = Record::new();
            stage_metadata.insert("stage_index".to_string(), json!(stage_index));
            stage_metadata.insert("mode".to_string(), json!(stage.mode_name()));
            stage_metadata.insert("algorithms".to_string(), json!(stage.algorithms.len()));
            ctx.emit(Event::start(EventName::HybridStage, stage_metadata.clone()));
            tracing::debug!(stage_index, mode = stage.mode_name(), "hybrid stage started");
            let stage_started = Instant::now();

            let result = self.run_stage(stage, current, ctx).await;

            stage_metadata.insert("status".to_string(), json!(status(&result)));
            ctx.emit(Event::stop(
                EventName::HybridStage,
                Measurements::elapsed(stage_started.elapsed()),
                stage_metadata,
            ));

            match result {
                Ok(output) => current = output,
                Err(error) => {
                    tracing::warn!(stage_index, error = %error, "hybrid stage failed");
                    metadata.insert("status".to_string(), json!("error"));
                    metadata.insert("failed_stage".to_string(), json!(stage_index));
                    ctx.emit(Event::stop(
                        EventName::Hybrid,
                        Measurements::elapsed(started.elapsed()).with_counts(1, stage_index),
                        metadata,
                    ));
                    return Err(error);
                }
            }
        }

        metadata.insert("status".to_string(), json!("ok"));
        ctx.emit(Event::stop(
            EventName::Hybrid,
            Measurements::elapsed(started.elapsed()).with_counts(0, total_stages),
            metadata,
        ));
        Ok(current)
    }

    /// Every algorithm in every stage is checked against the pipeline input.
    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        self.stages
            .iter()
            .flat_map(|stage| stage.algorithms.iter())
            .all(|algorithm| algorithm.can_execute(input, ctx))
    }

    fn metadata(&self) -> Metadata {
        Metadata::new("hybrid")
            .with_description("Runs sequential and parallel stages in order with fallback chains")
            .with_extra("stages", json!(self.stages.len()))
    }
}
