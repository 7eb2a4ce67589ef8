// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the adapter.
//!
//! Uses the `metrics` crate, so the host application picks the exporter.
//!
//! # Metric Naming Convention
//! - `sync_adapter_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `mode`: batch, single
//! - `status`: committed, skipped, failed, cancelled
//! - `operation`: fill, fill_schema, update

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record one round-trip to the data source
pub fn record_dispatch(mode: &'static str) {
    counter!("sync_adapter_dispatches_total", "mode" => mode).increment(1);
}

/// Record how many commands went out in one batch
pub fn record_batch_size(count: usize) {
    histogram!("sync_adapter_batch_size").record(count as f64);
}

/// Record a row reaching a terminal state
pub fn record_row(status: &'static str) {
    counter!("sync_adapter_rows_total", "status" => status).increment(1);
}

/// Record rows loaded by a fill
pub fn record_rows_filled(count: usize) {
    counter!("sync_adapter_rows_filled_total").increment(count as u64);
}

/// Record operation latency
pub fn record_latency(operation: &'static str, duration: Duration) {
    histogram!("sync_adapter_operation_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record a failed attempt to open the connection
pub fn record_connect_failure() {
    counter!("sync_adapter_connect_failures_total").increment(1);
}

/// Records operation latency when dropped
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recorders_without_exporter_do_not_panic() {
        record_dispatch("batch");
        record_batch_size(10);
        record_row("committed");
        record_rows_filled(3);
        record_connect_failure();
        let _timer = LatencyTimer::new("update");
    }

    #[test]
    fn test_dispatch_counter_is_captured() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_dispatch("single");
            record_dispatch("single");
        });

        let total: u64 = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == "sync_adapter_dispatches_total")
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(n) => n,
                _ => 0,
            })
            .sum();
        assert_eq!(total, 2);
    }
}
