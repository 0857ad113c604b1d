//! Error types for algorithm execution.
//!
//! Every executor returns [`Result`]; nothing in this crate lets a unit's
//! panic escape to the caller. The variants mirror the failure kinds an
//! executor can observe: a unit's own domain error, a captured panic, a
//! branch deadline, and the aggregate failures of parallel and fallback
//! execution.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

/// A failed parallel branch, tagged with its position in the branch list.
#[derive(Debug)]
pub struct BranchFailure {
    /// Position of the branch in the original algorithm list.
    pub index: usize,
    /// Name of the algorithm that ran in this branch.
    pub algorithm: String,
    /// What went wrong.
    pub error: Error,
}

/// The main error type for algorithm execution.
#[derive(Error, Debug)]
pub enum Error {
    /// A unit returned an explicit domain error.
    #[error("algorithm failed: {reason}")]
    Failed {
        /// Open record describing the failure.
        reason: Value,
    },

    /// A step of a sequential run failed.
    #[error("step {step_index} ('{step_name}') failed: {source}")]
    Step {
        /// Zero-based position of the failing step.
        step_index: usize,
        /// Name of the failing step.
        step_name: String,
        /// Name of the algorithm executed at that step.
        algorithm: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// A unit panicked and the panic was captured at an executor boundary.
    #[error("algorithm panicked: {message}")]
    Panicked {
        /// The panic payload rendered as text.
        message: String,
    },

    /// A parallel branch exceeded its deadline.
    #[error("timed out after {after:?}")]
    Timeout {
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Every branch of an `ignore_errors` parallel run failed.
    #[error("all parallel branches failed")]
    AllFailed,

    /// A primary unit and every configured fallback failed.
    #[error("all fallbacks failed for '{algorithm}'")]
    AllFallbacksFailed {
        /// Name of the primary algorithm.
        algorithm: String,
        /// Errors in attempt order: the primary first, then each fallback.
        attempts: Vec<Error>,
    },

    /// Errors gathered by a `collect_errors` parallel run.
    #[error("{} parallel branch(es) failed, {} succeeded", errors.len(), successful.len())]
    Collected {
        /// Failed branches in branch order.
        errors: Vec<BranchFailure>,
        /// Successful outputs in branch order.
        successful: Vec<Value>,
    },

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Build a domain error from any JSON-convertible reason.
    pub fn failed(reason: impl Into<Value>) -> Self {
        Error::Failed {
            reason: reason.into(),
        }
    }

    /// Strip [`Error::Step`] wrappers and return the underlying error.
    #[must_use]
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Step { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the underlying error is a branch timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    /// Render this error as an open record, suitable for logging or
    /// returning across a serialization boundary.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Error::Failed { reason } => json!({ "reason": reason }),
            Error::Step {
                step_index,
                step_name,
                algorithm,
                source,
            } => json!({
                "reason": source.to_value(),
                "step_index": step_index,
                "step_name": step_name,
                "algorithm": algorithm,
            }),
            Error::Panicked { message } => json!({ "exception": message }),
            Error::Timeout { after } => {
                json!({ "reason": "timeout", "after_ms": after.as_millis() as u64 })
            }
            Error::AllFailed => json!({ "reason": "all_failed" }),
            Error::AllFallbacksFailed {
                algorithm,
                attempts,
            } => json!({
                "reason": "all_fallbacks_failed",
                "algorithm": algorithm,
                "attempts": attempts.iter().map(Error::to_value).collect::<Vec<_>>(),
            }),
            Error::Collected { errors, successful } => json!({
                "errors": errors
                    .iter()
                    .map(|f| json!({
                        "index": f.index,
                        "algorithm": f.algorithm,
                        "error": f.error.to_value(),
                    }))
                    .collect::<Vec<_>>(),
                "successful": successful,
            }),
            other => json!({ "reason": other.to_string() }),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for algorithm execution.
pub type Result<T> = std::result::Result<T, Error>;
