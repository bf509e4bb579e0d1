//! Analytics collector background task.
//!
//! Each tick appends one sample per metric: processing rate since the
//! previous tick, active meetings, tracked participants, cumulative failures
//! and queue depth.

use crate::ingest::QueueMonitor;
use crate::observability::metrics;
use crate::pipeline::ProcessingStats;
use crate::state::TrackedCounts;
use crate::store::{AnalyticsMetric, AnalyticsSample, DurableStore};

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Analytics collector configuration.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub interval: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_ANALYTICS_INTERVAL_SECONDS),
        }
    }
}

/// Computes and persists analytics samples.
///
/// Keeps the handled-event count and instant of the previous tick so the
/// processing rate covers exactly the interval between ticks.
pub struct AnalyticsCollector {
    store: Arc<dyn DurableStore>,
    stats: Arc<ProcessingStats>,
    counts: Arc<TrackedCounts>,
    queue: Arc<QueueMonitor>,
    last_handled: u64,
    last_tick: Instant,
}

impl AnalyticsCollector {
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        stats: Arc<ProcessingStats>,
        counts: Arc<TrackedCounts>,
        queue: Arc<QueueMonitor>,
    ) -> Self {
        let last_handled = stats.processed() + stats.failed();
        Self {
            store,
            stats,
            counts,
            queue,
            last_handled,
            last_tick: Instant::now(),
        }
    }

    // Counts stay far below 2^53
    #[allow(clippy::cast_precision_loss)]
    fn samples(&mut self, now: DateTime<Utc>) -> Vec<AnalyticsSample> {
        let handled = self.stats.processed() + self.stats.failed();
        let window = self.last_tick.elapsed();
        let delta = handled.saturating_sub(self.last_handled);
        self.last_handled = handled;
        self.last_tick = Instant::now();

        let rate = if window.is_zero() {
            0.0
        } else {
            delta as f64 / window.as_secs_f64()
        };

        let counts = self.counts.snapshot();

        vec![
            AnalyticsSample::new(AnalyticsMetric::ProcessingRate, rate, now).with_detail(json!({
                "events": delta,
                "window_seconds": window.as_secs_f64(),
            })),
            AnalyticsSample::new(
                AnalyticsMetric::ActiveMeetings,
                counts.meetings_active as f64,
                now,
            ),
            AnalyticsSample::new(
                AnalyticsMetric::TrackedParticipants,
                counts.participants_tracked as f64,
                now,
            ),
            AnalyticsSample::new(
                AnalyticsMetric::EventsFailed,
                self.stats.failed() as f64,
                now,
            ),
            AnalyticsSample::new(
                AnalyticsMetric::QueueDepth,
                self.queue.current_depth() as f64,
                now,
            ),
        ]
    }

    /// Compute and append one round of samples. Returns how many were
    /// written; a failed append is logged and skipped.
    pub async fn run_analytics_collection(&mut self, now: DateTime<Utc>) -> usize {
        let samples = self.samples(now);
        let total = samples.len();
        let mut written = 0usize;

        for sample in &samples {
            match self.store.append_analytics(sample).await {
                Ok(()) => written += 1,
                Err(e) => {
                    metrics::record_error("append_analytics", e.error_type_label());
                    warn!(
                        target: "me.task.analytics",
                        metric_type = sample.metric_type.as_str(),
                        error = %e,
                        "Failed to append analytics sample"
                    );
                }
            }
        }

        metrics::record_task_run(
            "analytics",
            if written == total { "success" } else { "error" },
        );
        debug!(
            target: "me.task.analytics",
            written = written,
            total = total,
            "Analytics samples collected"
        );
        written
    }
}

/// Start the analytics loop. The first collection happens one interval after
/// start.
#[instrument(skip_all, name = "me.task.analytics")]
pub async fn start_analytics_collector(
    mut collector: AnalyticsCollector,
    config: AnalyticsConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "me.task.analytics",
        interval_secs = config.interval.as_secs(),
        "Starting analytics collector"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + config.interval, config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                collector.run_analytics_collection(Utc::now()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "me.task.analytics",
                    "Analytics collector received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::IngestionGateway;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn collector(store: Arc<InMemoryStore>, stats: Arc<ProcessingStats>) -> AnalyticsCollector {
        let (gateway, receiver) = IngestionGateway::new(Duration::from_secs(300), 8);
        drop(gateway);
        AnalyticsCollector::new(
            store,
            stats,
            TrackedCounts::new(),
            Arc::clone(receiver.monitor()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_covers_events_since_previous_tick() {
        let store = Arc::new(InMemoryStore::new());
        let stats = ProcessingStats::new();
        let mut collector = collector(store.clone(), Arc::clone(&stats));

        for _ in 0..20 {
            stats.record_processed(Duration::from_millis(1), Utc::now());
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(collector.run_analytics_collection(now).await, 5);

        let samples = store.list_analytics(now).await.unwrap();
        let rate = samples
            .iter()
            .find(|s| s.metric_type == AnalyticsMetric::ProcessingRate)
            .unwrap();
        assert!((rate.value - 2.0).abs() < 0.01);

        // Nothing new since the previous tick
        tokio::time::advance(Duration::from_secs(10)).await;
        let later = now + chrono::Duration::seconds(10);
        collector.run_analytics_collection(later).await;
        let samples = store.list_analytics(later).await.unwrap();
        let last_rate = samples
            .iter()
            .find(|s| s.metric_type == AnalyticsMetric::ProcessingRate)
            .unwrap();
        assert_eq!(last_rate.value, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_count_is_sampled() {
        let store = Arc::new(InMemoryStore::new());
        let stats = ProcessingStats::new();
        stats.record_failed(Duration::from_millis(1), Utc::now());
        let mut collector = collector(store.clone(), Arc::clone(&stats));
        tokio::time::advance(Duration::from_secs(1)).await;

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        collector.run_analytics_collection(now).await;

        let samples = store.list_analytics(now).await.unwrap();
        let failed = samples
            .iter()
            .find(|s| s.metric_type == AnalyticsMetric::EventsFailed)
            .unwrap();
        assert_eq!(failed.value, 1.0);
    }
}
