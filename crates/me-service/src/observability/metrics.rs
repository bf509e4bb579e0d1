//! Metrics definitions for the Meeting Events service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `me_` prefix for Meeting Events
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: accepted, duplicate, rejected_queue_full, rejected_draining
//! - `status`: success, failure, unmapped (processing); delivered, dropped (broadcast)
//! - `operation`: bounded by `DurableStore` methods (~12 values)
//! - `task`: sync, analytics, retention
//! - `error_type`: bounded by `MeError::error_type_label()`
//!
//! Event, meeting and participant ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Per-event processing: store round trips plus reconciler hop
        .set_buckets_for_metric(
            Matcher::Full("me_event_processing_seconds".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set processing latency buckets: {e}"))?
        // Store latency buckets - internal service call (like DB queries)
        .set_buckets_for_metric(
            Matcher::Prefix("me_store".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Ingestion
// ============================================================================

/// Record an ingestion decision.
///
/// Metric: `me_events_ingested_total`
/// Labels: `outcome`
pub fn record_ingest(outcome: &'static str) {
    counter!("me_events_ingested_total", "outcome" => outcome).increment(1);
}

/// Set the ingestion queue depth.
///
/// Metric: `me_queue_depth`
pub fn set_queue_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic queue depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("me_queue_depth").set(depth as f64);
}

// ============================================================================
// Processing
// ============================================================================

/// Record a processed event.
///
/// Metric: `me_events_processed_total`, `me_event_processing_seconds`
/// Labels: `status` (success, failure, unmapped)
pub fn record_event_processed(status: &'static str, duration: Duration) {
    counter!("me_events_processed_total", "status" => status).increment(1);
    histogram!("me_event_processing_seconds").record(duration.as_secs_f64());
}

/// Record an event whose provider type has no internal mapping.
///
/// Metric: `me_events_unmapped_total`
pub fn record_unmapped_event() {
    counter!("me_events_unmapped_total").increment(1);
}

// ============================================================================
// State
// ============================================================================

/// Set the number of meetings with status `started`.
///
/// Metric: `me_meetings_active`
pub fn set_meetings_active(count: u64) {
    // u64 to f64 conversion is safe for realistic meeting counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("me_meetings_active").set(count as f64);
}

/// Set the number of participant snapshots in the live map.
///
/// Metric: `me_participants_tracked`
pub fn set_participants_tracked(count: u64) {
    // u64 to f64 conversion is safe for realistic participant counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("me_participants_tracked").set(count as f64);
}

// ============================================================================
// Store / broadcast / tasks
// ============================================================================

/// Record durable store operation latency.
///
/// Metric: `me_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &'static str, duration: Duration) {
    histogram!("me_store_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record broadcast deliveries.
///
/// Metric: `me_broadcast_deliveries_total`
/// Labels: `status` (delivered, dropped)
pub fn record_broadcast(delivered: usize, dropped: usize) {
    counter!("me_broadcast_deliveries_total", "status" => "delivered").increment(delivered as u64);
    if dropped > 0 {
        counter!("me_broadcast_deliveries_total", "status" => "dropped").increment(dropped as u64);
    }
}

/// Record a background task iteration.
///
/// Metric: `me_task_runs_total`
/// Labels: `task`, `status` (success, error)
pub fn record_task_run(task: &'static str, status: &'static str) {
    counter!("me_task_runs_total", "task" => task, "status" => status).increment(1);
}

/// Record an error by operation and type.
///
/// Metric: `me_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_error(operation: &'static str, error_type: &'static str) {
    counter!(
        "me_errors_total",
        "operation" => operation,
        "error_type" => error_type
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These calls go to the no-op recorder unless one is installed; they
    // verify the label sets are accepted by the macros.

    #[test]
    fn test_record_ingest() {
        record_ingest("accepted");
        record_ingest("duplicate");
        record_ingest("rejected_queue_full");
        record_ingest("rejected_draining");
        set_queue_depth(0);
        set_queue_depth(4999);
    }

    #[test]
    fn test_record_processing() {
        record_event_processed("success", Duration::from_millis(2));
        record_event_processed("failure", Duration::from_millis(40));
        record_event_processed("unmapped", Duration::from_micros(300));
        record_unmapped_event();
    }

    #[test]
    fn test_record_store_broadcast_and_tasks() {
        record_store_latency("upsert_event", Duration::from_micros(800));
        record_broadcast(3, 0);
        record_broadcast(1, 2);
        for task in ["sync", "analytics", "retention"] {
            record_task_run(task, "success");
            record_task_run(task, "error");
        }
        record_error("persist_event", "store");
    }

    #[test]
    fn test_metrics_are_captured_by_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_ingest("accepted");
            set_queue_depth(12);
            record_event_processed("success", Duration::from_millis(1));
            record_unmapped_event();
            set_meetings_active(2);
            set_participants_tracked(5);
            record_store_latency("get_event", Duration::from_millis(1));
            record_task_run("sync", "success");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "me_events_ingested_total",
            "me_queue_depth",
            "me_events_processed_total",
            "me_event_processing_seconds",
            "me_events_unmapped_total",
            "me_meetings_active",
            "me_participants_tracked",
            "me_store_latency_seconds",
            "me_task_runs_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }
}
