//! Sorter stage metrics
//!
//! Emitted via the `metrics` crate facade; install any recorder
//! (Prometheus, statsd, ...) in the hosting process to export them.

use crate::common::TableId;

/// Per-table metric handles, labelled by changefeed and capture.
#[derive(Debug, Clone)]
pub struct TableSorterMetrics {
    changefeed: String,
    capture: String,
    table: String,
}

impl TableSorterMetrics {
    /// Create metric labels for a table.
    pub fn new(changefeed: &str, capture: &str, table_id: TableId) -> Self {
        Self {
            changefeed: changefeed.to_string(),
            capture: capture.to_string(),
            table: table_id.to_string(),
        }
    }

    /// Sample the table's flow-control consumption.
    pub fn observe_memory_consumption(&self, bytes: u64) {
        metrics::histogram!(
            "rivven_sorter_table_memory_consumption_bytes",
            "changefeed" => self.changefeed.clone(),
            "capture" => self.capture.clone()
        )
        .record(bytes as f64);
    }

    /// Record a resolved ts interpolated by the stage.
    pub fn record_interpolated(&self) {
        metrics::counter!(
            "rivven_sorter_resolved_ts_interpolated_total",
            "changefeed" => self.changefeed.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
    }

    /// Record a forwarded event or marker.
    pub fn record_forwarded(&self) {
        metrics::counter!(
            "rivven_sorter_events_forwarded_total",
            "changefeed" => self.changefeed.clone(),
            "table" => self.table.clone()
        )
        .increment(1);
    }

    /// Record the latest resolved ts received from upstream.
    pub fn set_input_resolved_ts(&self, ts: u64) {
        metrics::gauge!(
            "rivven_sorter_input_resolved_ts",
            "changefeed" => self.changefeed.clone(),
            "table" => self.table.clone()
        )
        .set(ts as f64);
    }
}
