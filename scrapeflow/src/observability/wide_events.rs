//! Wide event emitter: one comprehensive payload per run.

use crate::events::{types, EventSink};
use crate::pipeline::ScrapeReport;
use std::collections::BTreeMap;

/// Emitter for wide run events.
pub struct WideEventEmitter {
    /// Event type used for the run payload.
    pub run_event_type: String,
}

impl Default for WideEventEmitter {
    fn default() -> Self {
        Self {
            run_event_type: types::RUN_COMPLETED.to_string(),
        }
    }
}

impl WideEventEmitter {
    /// Creates a new wide event emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the payload summarizing a finished run.
    #[must_use]
    pub fn build_run_payload(report: &ScrapeReport) -> serde_json::Value {
        let mut models_by_type: BTreeMap<&str, usize> = BTreeMap::new();
        for model in &report.models {
            *models_by_type.entry(model.type_name()).or_default() += 1;
        }
        let failures = &report.failures;

        serde_json::json!({
            "run_id": report.run_id.to_string(),
            "started_at": report.started_at.to_rfc3339(),
            "finished_at": report.finished_at.to_rfc3339(),
            "duration_ms": report.duration_ms(),
            "models": report.models.len(),
            "models_by_type": models_by_type,
            "units": {
                "total": failures.total_units,
                "completed": failures.completed_units,
                "failed": failures.failed_units,
                "skipped": failures.skipped_units,
            },
            "success_rate": failures.success_rate(),
            "failures": failures
                .failures
                .iter()
                .map(|f| serde_json::json!({
                    "order": f.order,
                    "step": f.step,
                    "error": f.error,
                    "error_type": f.error_type,
                }))
                .collect::<Vec<_>>(),
        })
    }

    /// Emits the run payload on `sink`.
    pub fn emit_run(&self, sink: &dyn EventSink, report: &ScrapeReport) {
        sink.try_emit(&self.run_event_type, Some(Self::build_run_payload(report)));
    }
}
