//! Pure utilities shared by the executors: recursive record merging,
//! branch-outcome partitioning, and reduction by merge strategy.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::algorithm::guard::panic_message;
use crate::algorithm::parallel::{BranchOutcome, MergeStrategy};
use crate::error::BranchFailure;
use crate::{Error, Result};

/// Nesting depth below which [`deep_merge`] stops recursing and lets the
/// later value replace the earlier one.
pub const DEFAULT_MERGE_DEPTH: usize = 32;

/// Recursively merge `right` into `left`; `right` wins on conflicts.
///
/// Nested objects are merged key by key. Any other pairing (object with
/// scalar, arrays, scalars) resolves to `right`.
///
/// # Example
///
/// ```rust
/// use algoflow::helpers::deep_merge;
/// use serde_json::json;
///
/// let merged = deep_merge(
///     json!({ "a": { "x": 1, "y": 1 }, "b": 1 }),
///     json!({ "a": { "y": 2 }, "c": 3 }),
/// );
/// assert_eq!(merged, json!({ "a": { "x": 1, "y": 2 }, "b": 1, "c": 3 }));
/// ```
#[must_use]
pub fn deep_merge(left: Value, right: Value) -> Value {
    deep_merge_with_depth(left, right, DEFAULT_MERGE_DEPTH)
}

/// [`deep_merge`] with an explicit recursion limit.
#[must_use]
pub fn deep_merge_with_depth(left: Value, right: Value, max_depth: usize) -> Value {
    match (left, right) {
        (Value::Object(mut left), Value::Object(right)) if max_depth > 0 => {
            for (key, value) in right {
                let merged = match left.remove(&key) {
                    Some(existing) => deep_merge_with_depth(existing, value, max_depth - 1),
                    None => value,
                };
                left.insert(key, merged);
            }
            Value::Object(left)
        }
        (_, right) => right,
    }
}

/// Deep-merge a list of records in order, starting from an empty record.
#[must_use]
pub fn merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values
        .into_iter()
        .fold(Value::Object(Default::default()), deep_merge)
}

/// Split branch outcomes into successful outputs and failures, both in
/// branch order.
#[must_use]
pub fn partition_results(mut outcomes: Vec<BranchOutcome>) -> (Vec<Value>, Vec<BranchFailure>) {
    outcomes.sort_by_key(|outcome| outcome.index);

    let mut successes = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => successes.push(value),
            Err(error) => failures.push(BranchFailure {
                index: outcome.index,
                algorithm: outcome.algorithm,
                error,
            }),
        }
    }
    (successes, failures)
}

/// Reduce successful outputs to a single value.
///
/// A panic inside a custom reducer is returned as [`Error::Panicked`].
pub fn reduce_results(successes: Vec<Value>, strategy: &MergeStrategy) -> Result<Value> {
    match strategy {
        MergeStrategy::MergeMaps => Ok(merge_all(successes)),
        MergeStrategy::Collect => Ok(Value::Array(successes)),
        MergeStrategy::Custom(reducer) => catch_unwind(AssertUnwindSafe(|| reducer(successes)))
            .map_err(|payload| Error::Panicked {
                message: panic_message(payload.as_ref()),
            }),
    }
}
