//! Metrics collection for algorithm execution.
//!
//! This module provides `EngineMetrics` for tracking how many units ran,
//! how many failed, and which failure kinds were observed.

use serde::{Deserialize, Serialize};

/// Aggregated metrics for one or more executor runs.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Number of units that completed successfully.
    pub units_completed: usize,
    /// Number of branches that hit their deadline.
    pub timeouts: usize,
    /// Number of captured panics.
    pub panics: usize,
    /// Number of times a fallback unit produced the result.
    pub fallbacks_used: usize,
    /// Collected failure messages.
    pub failures: Vec<String>,
}

impl EngineMetrics {
    /// Increment the completed-units counter.
    pub fn record_unit(&mut self) {
        self.units_completed += 1;
    }

    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Record a branch timeout.
    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    /// Record a captured panic.
    pub fn record_panic(&mut self) {
        self.panics += 1;
    }

    /// Record a successful fallback.
    pub fn record_fallback(&mut self) {
        self.fallbacks_used += 1;
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
