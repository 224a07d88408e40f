//! Failure recording for continue-on-failure execution.
//!
//! A failed unit of work abandons its own branch only. Failures are recorded
//! here and reported in the run summary.

use crate::order::StepOrder;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Record of one failed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Order of the failed unit, as `0-1-2`.
    pub order: String,
    /// Step name.
    pub step: String,
    /// Error message.
    pub error: String,
    /// Error classifier.
    pub error_type: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Additional context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(order: &StepOrder, step: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            order: order.to_string(),
            step: step.into(),
            error: error.into(),
            error_type: "Error".to_string(),
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Sets the error type.
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    /// Adds context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Counts and failures of a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Units that finished, successfully or not.
    pub total_units: usize,
    /// Units that finished successfully.
    pub completed_units: usize,
    /// Units that failed.
    pub failed_units: usize,
    /// Units dropped because the run was cancelled.
    pub skipped_units: usize,
    /// Failure records in the order they were recorded.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Returns the fraction of units that completed successfully.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_units == 0 {
            return 1.0;
        }
        self.completed_units as f64 / self.total_units as f64
    }

    /// Returns true if any unit failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counts {
    completed: usize,
    skipped: usize,
    failures: Vec<FailureRecord>,
}

/// Thread-safe collector shared by every unit of a run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    counts: Mutex<Counts>,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed unit.
    pub fn record_failure(&self, record: FailureRecord) {
        self.counts.lock().failures.push(record);
    }

    /// Records a successful unit.
    pub fn record_completion(&self) {
        self.counts.lock().completed += 1;
    }

    /// Records a unit dropped by cancellation.
    pub fn record_skip(&self) {
        self.counts.lock().skipped += 1;
    }

    /// Returns the failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.counts.lock().failures.clone()
    }

    /// Summarizes the run.
    #[must_use]
    pub fn summary(&self) -> FailureSummary {
        let counts = self.counts.lock();
        FailureSummary {
            total_units: counts.completed + counts.failures.len(),
            completed_units: counts.completed,
            failed_units: counts.failures.len(),
            skipped_units: counts.skipped,
            failures: counts.failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_record_creation() {
        let order = StepOrder::from_path(vec![0, 2, 1]);
        let record = FailureRecord::new(&order, "parse(text)", "boom")
            .with_error_type("ParseError")
            .with_context("url", serde_json::json!("http://s/"));

        assert_eq!(record.order, "0-2-1");
        assert_eq!(record.step, "parse(text)");
        assert_eq!(record.error_type, "ParseError");
        assert_eq!(record.context["url"], "http://s/");
    }

    #[test]
    fn test_summary_counts() {
        let collector = FailureCollector::new();
        assert_eq!(collector.summary().success_rate(), 1.0);

        collector.record_completion();
        collector.record_completion();
        collector.record_completion();
        collector.record_skip();
        collector.record_failure(FailureRecord::new(&StepOrder::initial(), "click", "timeout"));

        let summary = collector.summary();
        assert_eq!(summary.total_units, 4);
        assert_eq!(summary.completed_units, 3);
        assert_eq!(summary.failed_units, 1);
        assert_eq!(summary.skipped_units, 1);
        assert!(summary.has_failures());
        assert!((summary.success_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(collector.failures().len(), 1);
    }

    #[test]
    fn test_summary_serializes() {
        let collector = FailureCollector::new();
        collector.record_failure(FailureRecord::new(&StepOrder::initial(), "click", "timeout"));
        let json = serde_json::to_value(collector.summary()).unwrap();
        assert_eq!(json["failed_units"], 1);
        assert_eq!(json["failures"][0]["order"], "0");
    }
}
