//! Causality relay metrics
//!
//! Emitted via the `metrics` crate facade, labelled by task and source.

use std::time::Duration;

/// Metric handles of one relay.
#[derive(Debug, Clone)]
pub struct CausalityMetrics {
    task: String,
    source: String,
}

impl CausalityMetrics {
    pub fn new(task: &str, source: &str) -> Self {
        Self {
            task: task.to_string(),
            source: source.to_string(),
        }
    }

    /// Record an emitted conflict barrier.
    pub fn record_conflict(&self) {
        metrics::counter!(
            "rivven_causality_conflicts_total",
            "task" => self.task.clone(),
            "source" => self.source.clone()
        )
        .increment(1);
    }

    /// Record the number of jobs waiting in the inbound queue.
    pub fn set_input_queue_size(&self, size: usize) {
        metrics::gauge!(
            "rivven_causality_input_queue_size",
            "task" => self.task.clone(),
            "source" => self.source.clone()
        )
        .set(size as f64);
    }

    /// Record the time spent on conflict detection for one job.
    pub fn observe_detect_duration(&self, elapsed: Duration) {
        metrics::histogram!(
            "rivven_causality_detect_duration_seconds",
            "task" => self.task.clone(),
            "source" => self.source.clone()
        )
        .record(elapsed.as_secs_f64());
    }
}
