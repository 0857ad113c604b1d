//! Concurrent fan-out over a list of algorithms.
//!
//! Every branch receives its own copy of the same input. Branches run as
//! independent tokio tasks, optionally gated by a concurrency limit and a
//! per-branch deadline, and their outcomes are reduced according to an
//! [`ErrorMode`] and a [`MergeStrategy`].

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use super::guard::{catch_panic, panic_message};
use super::{Algorithm, AlgorithmExt, AlgorithmRef, Metadata};
use crate::events::{Event, EventName, Measurements};
use crate::helpers::{partition_results, reduce_results};
use crate::{Context, Error, Record, Result};

/// How branch failures affect the overall result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Return the first observed error; abandon the remaining branches.
    #[default]
    FailFast,
    /// Wait for every branch and report all errors alongside the successes.
    CollectErrors,
    /// Wait for every branch and reduce only the successes.
    IgnoreErrors,
}

impl FromStr for ErrorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail_fast" => Ok(Self::FailFast),
            "collect_errors" => Ok(Self::CollectErrors),
            "ignore_errors" => Ok(Self::IgnoreErrors),
            other => Err(Error::Validation(format!("unknown error mode '{other}'"))),
        }
    }
}

/// A caller-supplied reduction over the ordered successful outputs.
pub type Reducer = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// How successful branch outputs are reduced to one value.
#[derive(Clone, Default)]
pub enum MergeStrategy {
    /// Deep-merge the output records in branch order; later branches win.
    #[default]
    MergeMaps,
    /// Return the outputs as an ordered list.
    Collect,
    /// Apply a custom reducer to the ordered outputs.
    Custom(Reducer),
}

impl MergeStrategy {
    /// Wrap a closure as a custom strategy.
    pub fn custom(reducer: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(reducer))
    }

    /// The strategy's configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergeMaps => "merge_maps",
            Self::Collect => "collect",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge_maps" => Ok(Self::MergeMaps),
            "collect" => Ok(Self::Collect),
            other => Err(Error::Validation(format!(
                "unknown merge strategy '{other}'"
            ))),
        }
    }
}

impl Serialize for MergeStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MergeStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Execution policy for a parallel run.
///
/// # Example
///
/// ```rust
/// use algoflow::{ErrorMode, MergeStrategy, ParallelOptions};
/// use std::time::Duration;
///
/// let options = ParallelOptions::default()
///     .with_error_mode(ErrorMode::CollectErrors)
///     .with_merge_strategy(MergeStrategy::Collect)
///     .with_max_concurrency(4)
///     .with_timeout(Duration::from_secs(2));
///
/// let parsed: ParallelOptions = serde_json::from_str(
///     r#"{ "error_mode": "ignore_errors", "merge_strategy": "collect", "timeout": null }"#,
/// ).unwrap();
/// assert_eq!(parsed.error_mode, ErrorMode::IgnoreErrors);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    /// Reduction applied to successful outputs.
    pub merge_strategy: MergeStrategy,
    /// Failure policy.
    pub error_mode: ErrorMode,
    /// Maximum number of branches running at once; unbounded when absent.
    pub max_concurrency: Option<usize>,
    /// Per-branch deadline; unbounded when absent.
    pub timeout: Option<Duration>,
}

impl ParallelOptions {
    /// Set the merge strategy.
    #[must_use]
    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> Self {
        self.merge_strategy = merge_strategy;
        self
    }

    /// Set the error mode.
    #[must_use]
    pub fn with_error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    /// Limit how many branches run at once. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency.max(1));
        self
    }

    /// Bound each branch by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The settled result of one branch.
#[derive(Debug)]
pub struct BranchOutcome {
    /// Position of the branch in the algorithm list.
    pub index: usize,
    /// Name of the algorithm the branch ran.
    pub algorithm: String,
    /// What the branch produced.
    pub result: Result<Value>,
}

/// Runs a list of algorithms concurrently against one input.
///
/// # Example
///
/// ```rust
/// use algoflow::{Algorithm, AlgorithmExt, Context, Lambda, MergeStrategy, Parallel, ParallelOptions};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let a = Lambda::new("a", |_| async { Ok::<_, algoflow::Error>(json!({ "a": "x" })) });
/// let b = Lambda::new("b", |_| async { Ok::<_, algoflow::Error>(json!({ "b": "y" })) });
///
/// let merged = Parallel::new(vec![a.shared(), b.shared()]);
/// let out = merged.execute(json!({}), &Context::new()).await.unwrap();
/// assert_eq!(out, json!({ "a": "x", "b": "y" }));
/// # });
/// ```
#[derive(Clone)]
pub struct Parallel {
    algorithms: Vec<AlgorithmRef>,
    options: ParallelOptions,
}

impl Parallel {
    /// Fan out over `algorithms` with default options.
    #[must_use]
    pub fn new(algorithms: Vec<AlgorithmRef>) -> Self {
        Self::with_options(algorithms, ParallelOptions::default())
    }

    /// Fan out over `algorithms` with the given options.
    #[must_use]
    pub fn with_options(algorithms: Vec<AlgorithmRef>, options: ParallelOptions) -> Self {
        Self {
            algorithms,
            options,
        }
    }

    /// The branch algorithms.
    #[must_use]
    pub fn algorithms(&self) -> &[AlgorithmRef] {
        &self.algorithms
    }

    /// The execution policy.
    #[must_use]
    pub fn options(&self) -> &ParallelOptions {
        &self.options
    }

    /// Spawn every branch and wait for them to settle.
    ///
    /// Under [`ErrorMode::FailFast`] this returns the first error, with the
    /// number of branches that had succeeded by then, as soon as it is
    /// observed; dropping the guard aborts the branches still running.
    async fn gather(
        &self,
        input: Value,
        ctx: &Context,
    ) -> std::result::Result<Vec<BranchOutcome>, (Error, usize)> {
        // A limit of zero would never admit a branch.
        let semaphore = self
            .options
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut pending = FuturesUnordered::new();
        let mut guard = AbortOnDrop(Vec::with_capacity(self.algorithms.len()));

        for (index, algorithm) in self.algorithms.iter().enumerate() {
            let handle = tokio::spawn(run_branch(
                index,
                Arc::clone(algorithm),
                input.clone(),
                ctx.clone(),
                semaphore.clone(),
                self.options.timeout,
            ));
            guard.0.push(handle.abort_handle());
            let algorithm = algorithm.name();
            pending.push(async move { (index, algorithm, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(self.algorithms.len());
        while let Some((index, algorithm, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(Error::Panicked {
                    message: panic_message(err.into_panic().as_ref()),
                }),
                Err(err) => Err(Error::Message(format!("branch task cancelled: {err}"))),
            };

            let result = match result {
                Err(error) if self.options.error_mode == ErrorMode::FailFast => {
                    tracing::debug!(
                        branch = index,
                        algorithm = %algorithm,
                        "fail-fast: abandoning remaining branches"
                    );
                    // Under fail-fast every outcome gathered so far succeeded.
                    return Err((error, outcomes.len()));
                }
                other => other,
            };
            outcomes.push(BranchOutcome {
                index,
                algorithm,
                result,
            });
        }
        Ok(outcomes)
    }

    fn settle(&self, outcomes: Vec<BranchOutcome>) -> (Result<Value>, Measurements) {
        let (successes, failures) = partition_results(outcomes);
        let counts = Measurements::default().with_counts(failures.len(), successes.len());

        let result = match self.options.error_mode {
            _ if failures.is_empty() => reduce_results(successes, &self.options.merge_strategy),
            ErrorMode::FailFast => Err(failures
                .into_iter()
                .next()
                .map_or(Error::AllFailed, |failure| failure.error)),
            ErrorMode::CollectErrors => Err(Error::Collected {
                errors: failures,
                successful: successes,
            }),
            ErrorMode::IgnoreErrors if successes.is_empty() => Err(Error::AllFailed),
            ErrorMode::IgnoreErrors => {
                tracing::debug!(
                    discarded = failures.len(),
                    "ignoring failed parallel branches"
                );
                reduce_results(successes, &self.options.merge_strategy)
            }
        };
        (result, counts)
    }

    fn event_metadata(&self) -> Record {
        let mut metadata = Record::new();
        metadata.insert("branches".to_string(), json!(self.algorithms.len()));
        metadata.insert("error_mode".to_string(), json!(self.options.error_mode));
        metadata.insert(
            "merge_strategy".to_string(),
            json!(self.options.merge_strategy.as_str()),
        );
        metadata
    }
}

#[async_trait]
impl Algorithm for Parallel {
    async fn execute(&self, input: Value, ctx: &Context) -> Result<Value> {
        if self.algorithms.is_empty() {
            return Ok(input);
        }

        tracing::debug!(
            branches = self.algorithms.len(),
            max_concurrency = ?self.options.max_concurrency,
            timeout = ?self.options.timeout,
            error_mode = ?self.options.error_mode,
            "parallel run started"
        );
        ctx.emit(Event::start(EventName::Parallel, self.event_metadata()));
        let started = Instant::now();

        let (result, counts) = match self.gather(input, ctx).await {
            Ok(outcomes) => self.settle(outcomes),
            Err((error, succeeded)) => (Err(error), Measurements::default().with_counts(1, succeeded)),
        };

        let mut metadata = self.event_metadata();
        metadata.insert("status".to_string(), json!(status(&result)));
        ctx.emit(Event::stop(
            EventName::Parallel,
            Measurements {
                duration_ms: Some(started.elapsed().as_millis()),
                ..counts
            },
            metadata,
        ));
        result
    }

    fn can_execute(&self, input: &Value, ctx: &Context) -> bool {
        self.algorithms
            .iter()
            .all(|algorithm| algorithm.can_execute(input, ctx))
    }

    fn metadata(&self) -> Metadata {
        Metadata::new("parallel")
            .with_description("Runs algorithms concurrently against the same input")
            .with_extra("branches", json!(self.algorithms.len()))
    }
}

/// Aborts every registered task when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn run_branch(
    index: usize,
    algorithm: AlgorithmRef,
    input: Value,
    ctx: Context,
    semaphore: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
) -> Result<Value> {
    // Held until the branch settles; the deadline starts once admitted.
    let _permit = match semaphore {
        Some(semaphore) => Some(
            semaphore
                .acquire_owned()
                .await
                .map_err(|err| Error::Message(format!("concurrency limiter closed: {err}")))?,
        ),
        None => None,
    };

    let name = algorithm.name();
    let mut metadata = Record::new();
    metadata.insert("branch_index".to_string(), json!(index));
    metadata.insert("algorithm".to_string(), json!(name));
    ctx.emit(Event::start(EventName::ParallelTask, metadata.clone()));
    let started = Instant::now();

    let run = catch_panic(algorithm.execute(input, &ctx));
    let result = match timeout {
        Some(after) => match tokio::time::timeout(after, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { after }),
        },
        None => run.await,
    };

    let measurements = Measurements::elapsed(started.elapsed());
    metadata.insert("status".to_string(), json!(status(&result)));
    match &result {
        Ok(_) => {
            ctx.record_unit();
            ctx.emit(Event::stop(EventName::ParallelTask, measurements, metadata));
        }
        Err(Error::Panicked { message }) => {
            tracing::warn!(branch = index, algorithm = %name, %message, "parallel branch panicked");
            ctx.record_panic();
            ctx.record_failure(format!("{name}: panicked: {message}"));
            ctx.emit(Event::exception(EventName::ParallelTask, measurements, metadata));
        }
        Err(err) => {
            if matches!(err, Error::Timeout { .. }) {
                ctx.record_timeout();
            }
            tracing::warn!(branch = index, algorithm = %name, error = %err, "parallel branch failed");
            ctx.record_failure(format!("{name}: {err}"));
            ctx.emit(Event::stop(EventName::ParallelTask, measurements, metadata));
        }
    }
    result
}

pub(crate) fn status(result: &Result<Value>) -> &'static str {
    if result.is_ok() {
        "ok"
    } else {
        "error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MemorySink, Phase};
    use crate::Lambda;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn emit(name: &'static str, value: Value) -> AlgorithmRef {
        Lambda::new(name, move |_| {
            let value = value.clone();
            async move { Ok::<_, Error>(value) }
        })
        .shared()
    }

    fn fail(name: &'static str) -> AlgorithmRef {
        Lambda::new(name, move |_| async move {
            Err::<Value, _>(Error::failed(json!({ "from": name })))
        })
        .shared()
    }

    fn sleepy(name: &'static str, millis: u64) -> AlgorithmRef {
        Lambda::new(name, move |_| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, Error>(json!({ name: millis }))
        })
        .shared()
    }

    #[tokio::test]
    async fn test_empty_list_is_identity() {
        let out = Parallel::new(Vec::new())
            .execute(json!({ "keep": true }), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "keep": true }));
    }

    #[tokio::test]
    async fn test_every_branch_sees_the_same_input() {
        let echo = |name: &'static str| {
            Lambda::new(name, move |input: Value| async move {
                Ok::<_, Error>(json!({ name: input["seed"].clone() }))
            })
            .shared()
        };
        let out = Parallel::new(vec![echo("a"), echo("b")])
            .execute(json!({ "seed": 7 }), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "a": 7, "b": 7 }));
    }

    #[tokio::test]
    async fn test_collect_preserves_branch_order() {
        let options = ParallelOptions::default().with_merge_strategy(MergeStrategy::Collect);
        let out = Parallel::with_options(
            vec![sleepy("slow", 40), sleepy("fast", 1), emit("now", json!({ "now": 0 }))],
            options,
        )
        .execute(json!({}), &Context::new())
        .await
        .unwrap();
        assert_eq!(out, json!([{ "slow": 40 }, { "fast": 1 }, { "now": 0 }]));
    }

    #[tokio::test]
    async fn test_merge_maps_later_branch_wins_regardless_of_completion() {
        let out = Parallel::new(vec![
            emit("first", json!({ "k": "first", "nested": { "a": 1 } })),
            Lambda::new("second", |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, Error>(json!({ "k": "second", "nested": { "b": 2 } }))
            })
            .shared(),
        ])
        .execute(json!({}), &Context::new())
        .await
        .unwrap();
        assert_eq!(out, json!({ "k": "second", "nested": { "a": 1, "b": 2 } }));
    }

    #[tokio::test]
    async fn test_custom_reducer() {
        let options = ParallelOptions::default().with_merge_strategy(MergeStrategy::custom(|items| {
            json!(items.iter().filter_map(|v| v["n"].as_i64()).sum::<i64>())
        }));
        let out = Parallel::with_options(
            vec![emit("one", json!({ "n": 1 })), emit("two", json!({ "n": 2 }))],
            options,
        )
        .execute(json!({}), &Context::new())
        .await
        .unwrap();
        assert_eq!(out, json!(3));
    }

    #[tokio::test]
    async fn test_fail_fast_returns_branch_error() {
        let err = Parallel::new(vec![sleepy("slow", 200), fail("broken")])
            .execute(json!({}), &Context::new())
            .await
            .unwrap_err();
        match err {
            Error::Failed { reason } => assert_eq!(reason, json!({ "from": "broken" })),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_fast_does_not_wait_for_slow_siblings() {
        let started = Instant::now();
        let result = Parallel::new(vec![sleepy("slow", 2_000), fail("broken")])
            .execute(json!({}), &Context::new())
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_collect_errors_reports_all_failures_and_successes() {
        let options = ParallelOptions::default().with_error_mode(ErrorMode::CollectErrors);
        let err = Parallel::with_options(
            vec![fail("a"), emit("ok", json!({ "ok": 1 })), fail("c")],
            options,
        )
        .execute(json!({}), &Context::new())
        .await
        .unwrap_err();

        match err {
            Error::Collected { errors, successful } => {
                let indices: Vec<_> = errors.iter().map(|f| f.index).collect();
                assert_eq!(indices, vec![0, 2]);
                assert_eq!(errors[0].algorithm, "a");
                assert_eq!(successful, vec![json!({ "ok": 1 })]);
            }
            other => panic!("expected Collected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ignore_errors_keeps_successes() {
        let options = ParallelOptions::default().with_error_mode(ErrorMode::IgnoreErrors);
        let out = Parallel::with_options(
            vec![emit("ok", json!({ "ok": true })), fail("bad")],
            options.clone(),
        )
        .execute(json!({}), &Context::new())
        .await
        .unwrap();
        assert_eq!(out, json!({ "ok": true }));

        let err = Parallel::with_options(vec![fail("x"), fail("y")], options)
            .execute(json!({}), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllFailed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_concurrency_batches_branches() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tracked = |name: &'static str| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Lambda::new(name, move |_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Error>(json!({ name: true }))
                }
            })
            .shared()
        };

        let options = ParallelOptions::default().with_max_concurrency(2);
        let parallel = Parallel::with_options(
            vec![tracked("a"), tracked("b"), tracked("c"), tracked("d")],
            options,
        );

        let started = Instant::now();
        let out = parallel.execute(json!({}), &Context::new()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(out, json!({ "a": true, "b": true, "c": true, "d": true }));
        assert!(elapsed >= Duration::from_millis(100), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(190), "took {elapsed:?}");
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_marks_only_the_slow_branch() {
        let options = ParallelOptions::default()
            .with_error_mode(ErrorMode::CollectErrors)
            .with_timeout(Duration::from_millis(50));
        let ctx = Context::new();

        let started = Instant::now();
        let err = Parallel::with_options(vec![sleepy("slow", 5_000), sleepy("quick", 5)], options)
            .execute(json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(1_000));

        match err {
            Error::Collected { errors, successful } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].error.is_timeout());
                assert_eq!(successful, vec![json!({ "quick": 5 })]);
            }
            other => panic!("expected Collected, got {other:?}"),
        }
        assert_eq!(ctx.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_panicking_branch_is_captured() {
        let boom = Lambda::new("boom", |_| async {
            if true {
                panic!("branch exploded");
            }
            Ok::<_, Error>(Value::Null)
        })
        .shared();
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        let err = Parallel::new(vec![boom, emit("ok", json!({}))])
            .execute(json!({}), &ctx)
            .await
            .unwrap_err();
        match err {
            Error::Panicked { message } => assert_eq!(message, "branch exploded"),
            other => panic!("expected Panicked, got {other:?}"),
        }
        assert_eq!(sink.filter(EventName::ParallelTask, Phase::Exception).len(), 1);
        assert_eq!(ctx.snapshot().panics, 1);
    }

    #[tokio::test]
    async fn test_telemetry_counts() {
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());
        let options = ParallelOptions::default().with_error_mode(ErrorMode::IgnoreErrors);

        Parallel::with_options(vec![emit("a", json!({})), fail("b"), emit("c", json!({}))], options)
            .execute(json!({}), &ctx)
            .await
            .unwrap();

        assert_eq!(sink.filter(EventName::ParallelTask, Phase::Start).len(), 3);
        let stops = sink.filter(EventName::Parallel, Phase::Stop);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].measurements.error_count, Some(1));
        assert_eq!(stops[0].measurements.success_count, Some(2));
        assert_eq!(stops[0].metadata["status"], "ok");
    }

    #[tokio::test]
    async fn test_fail_fast_stop_event_carries_counts() {
        let late_failure = Lambda::new("late_failure", |_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<Value, _>(Error::failed("late"))
        })
        .shared();
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        Parallel::new(vec![emit("a", json!({})), late_failure, emit("b", json!({}))])
            .execute(json!({}), &ctx)
            .await
            .unwrap_err();

        let stops = sink.filter(EventName::Parallel, Phase::Stop);
        assert_eq!(stops[0].metadata["status"], "error");
        assert_eq!(stops[0].measurements.error_count, Some(1));
        assert_eq!(stops[0].measurements.success_count, Some(2));
    }

    #[tokio::test]
    async fn test_zero_concurrency_from_config_still_runs() {
        let options: ParallelOptions =
            serde_json::from_str(r#"{ "max_concurrency": 0 }"#).unwrap();
        assert_eq!(options.max_concurrency, Some(0));

        let parallel = Parallel::with_options(vec![emit("a", json!({ "a": 1 })), emit("b", json!({ "b": 2 }))], options);
        let ctx = Context::new();
        let run = parallel.execute(json!({}), &ctx);
        let out = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("parallel run should settle")
            .unwrap();
        assert_eq!(out, json!({ "a": 1, "b": 2 }));
    }

    #[tokio::test]
    async fn test_panicking_reducer_is_captured() {
        let options = ParallelOptions::default()
            .with_merge_strategy(MergeStrategy::custom(|_| panic!("reducer exploded")));
        let sink = Arc::new(MemorySink::new());
        let ctx = Context::new().with_sink(sink.clone());

        let err = Parallel::with_options(vec![emit("a", json!({}))], options)
            .execute(json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Panicked { ref message } if message == "reducer exploded"));
        assert_eq!(sink.filter(EventName::Parallel, Phase::Stop)[0].metadata["status"], "error");
    }

    #[test]
    fn test_can_execute_requires_every_branch() {
        let ready = Lambda::new("ready", |v| async move { Ok::<_, Error>(v) }).shared();
        let picky = Lambda::new("picky", |v| async move { Ok::<_, Error>(v) })
            .with_precondition(|v| v.get("token").is_some())
            .shared();
        let parallel = Parallel::new(vec![ready, picky]);
        let ctx = Context::new();
        assert!(parallel.can_execute(&json!({ "token": 1 }), &ctx));
        assert!(!parallel.can_execute(&json!({}), &ctx));
    }

    #[test]
    fn test_parse_policy_names() {
        assert_eq!("collect_errors".parse::<ErrorMode>().unwrap(), ErrorMode::CollectErrors);
        assert!("sometimes".parse::<ErrorMode>().is_err());
        assert!(matches!("collect".parse::<MergeStrategy>().unwrap(), MergeStrategy::Collect));
        assert!("custom".parse::<MergeStrategy>().is_err());
    }
}
