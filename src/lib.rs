//! # algoflow
//!
//! Composable, async algorithm execution in Rust.
//!
//! This crate provides a common contract for units of work over JSON
//! records, and a family of executors that compose them: in order, in
//! parallel, as an expression tree, or as a staged pipeline with fallbacks.
//! Every executor reports structured telemetry through a pluggable sink and
//! turns unit panics into ordinary errors.
//!
//! ## Core Concepts
//!
//! - **Algorithm**: The fundamental trait for units of work
//! - **Context**: Per-run values, step position, telemetry sink and metrics
//! - **Sequential**: Runs units in order, threading output to input
//! - **Parallel**: Runs units concurrently and merges their outputs
//! - **Node**: Composite expression trees (sequence, parallel, choice, repeat, when, compose)
//! - **Hybrid**: Multi-stage pipelines with per-unit fallback chains
//! - **Instrumented**: Per-unit telemetry wrapper
//! - **Workflow**: High-level container with automatic metrics collection
//!
//! ## Example: Fan-out and Merge
//!
//! ```rust
//! use algoflow::{AlgorithmExt, Lambda, Parallel, Sequential, Workflow};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let normalize = Lambda::new("normalize", |v| async move {
//!     let text = v["text"].as_str().unwrap_or_default().trim().to_lowercase();
//!     Ok::<_, algoflow::Error>(json!({ "text": text }))
//! });
//! let length = Lambda::new("length", |v| async move {
//!     Ok::<_, algoflow::Error>(json!({ "length": v["text"].as_str().map_or(0, str::len) }))
//! });
//! let words = Lambda::new("words", |v| async move {
//!     Ok::<_, algoflow::Error>(json!({ "words": v["text"].as_str().map_or(0, |t| t.split_whitespace().count()) }))
//! });
//!
//! let pipeline = Sequential::new(vec![
//!     normalize.shared(),
//!     Parallel::new(vec![length.shared(), words.shared()]).shared(),
//! ]);
//!
//! let (result, metrics) = Workflow::new(pipeline).run(json!({ "text": "  Hello World " })).await.unwrap();
//! assert_eq!(result, json!({ "length": 11, "words": 2 }));
//! assert_eq!(metrics.units_completed, 4);
//! # });
//! ```

pub mod algorithm;
pub mod context;
pub mod error;
pub mod events;
pub mod helpers;
pub mod instrumented;
pub mod metrics;
pub mod workflow;

/// An open record: string keys to arbitrary JSON values.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use algorithm::{composite, hybrid, parallel, sequential};

pub use algorithm::{
    Algorithm, AlgorithmExt, AlgorithmRef, ErrorDecision, Lambda, Metadata, RetryOptions,
};
pub use composite::{Condition, Node, RepeatOptions};
pub use context::{Context, StepInfo};
pub use error::{BranchFailure, Error, Result};
pub use events::{Event, EventName, EventSink, MemorySink, NoopSink, Phase, TraceEntry, TracingSink};
pub use hybrid::{Hybrid, Stage, StageMode, WithFallbacks};
pub use instrumented::Instrumented;
pub use metrics::EngineMetrics;
pub use parallel::{ErrorMode, MergeStrategy, Parallel, ParallelOptions};
pub use sequential::Sequential;
pub use workflow::Workflow;
