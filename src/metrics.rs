//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Target write attempts, retries and DLQ traffic
//! - Discovery snapshot sizes
//! - CDC staging volume
//! - Cycle durations and stop-flag observations
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.

use crate::cdc::MirrorOp;
use crate::config::ProcessType;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a successful target write and how many attempts it took.
pub fn record_write(tile: u32, op: MirrorOp, attempts: u32) {
    counter!("mirror_writes_total", "tile" => tile.to_string(), "op" => op.as_str()).increment(1);
    histogram!("mirror_write_attempts", "op" => op.as_str()).record(f64::from(attempts));
}

/// Record one retry of a target write.
pub fn record_write_retry(tile: u32, op: MirrorOp) {
    counter!("mirror_write_retries_total", "tile" => tile.to_string(), "op" => op.as_str())
        .increment(1);
}

/// Record a statement diverted to the dead-letter store.
pub fn record_dlq_diverted(tile: u32, op: MirrorOp) {
    counter!("mirror_dlq_diverted_total", "tile" => tile.to_string(), "op" => op.as_str())
        .increment(1);
}

/// Record a dead-letter statement successfully replayed.
pub fn record_dlq_replayed(tile: u32, op: MirrorOp) {
    counter!("mirror_dlq_replayed_total", "tile" => tile.to_string(), "op" => op.as_str())
        .increment(1);
}

/// Record rows written into a discovery snapshot.
pub fn record_discovery_rows(tile: u32, rows: usize) {
    counter!("mirror_discovery_rows_total", "tile" => tile.to_string()).increment(rows as u64);
    gauge!("mirror_discovery_last_snapshot_rows", "tile" => tile.to_string()).set(rows as f64);
}

/// Record rows applied to the target in one batch.
pub fn record_rows_applied(tile: u32, op: MirrorOp, rows: usize) {
    counter!("mirror_rows_applied_total", "tile" => tile.to_string(), "op" => op.as_str())
        .increment(rows as u64);
}

/// Record CDC events staged to the object store.
pub fn record_cdc_events_staged(tile: u32, events: usize) {
    counter!("mirror_cdc_events_staged_total", "tile" => tile.to_string())
        .increment(events as u64);
}

/// Record one orchestrator cycle's duration.
pub fn record_cycle_duration(process: ProcessType, duration: Duration) {
    histogram!("mirror_cycle_duration_seconds", "process" => process.as_str())
        .record(duration.as_secs_f64());
}

/// Record observation of a stop flag.
pub fn record_stop_flag(process: ProcessType) {
    counter!("mirror_stop_flags_total", "process" => process.as_str()).increment(1);
}
