//! Retention cleaner background task.
//!
//! Each iteration:
//! 1. Deletes events (and their outcomes) received before the event retention
//! 2. Deletes analytics samples older than the analytics retention
//! 3. Evicts expired dedup entries
//! 4. Evicts ended meetings idle longer than the ended-meeting TTL
//! 5. Forgets evicted meetings that ended before the event retention

use super::cutoff_before;
use crate::ingest::IngestionGateway;
use crate::observability::metrics;
use crate::state::ReconcilerHandle;
use crate::store::DurableStore;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Retention configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub interval: Duration,
    pub event_retention: Duration,
    pub analytics_retention: Duration,
    pub ended_meeting_ttl: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        use crate::config::{
            DEFAULT_ANALYTICS_RETENTION_DAYS, DEFAULT_ENDED_MEETING_TTL_SECONDS,
            DEFAULT_EVENT_RETENTION_HOURS, DEFAULT_RETENTION_INTERVAL_SECONDS,
        };
        Self {
            interval: Duration::from_secs(DEFAULT_RETENTION_INTERVAL_SECONDS),
            event_retention: Duration::from_secs(DEFAULT_EVENT_RETENTION_HOURS * 3600),
            analytics_retention: Duration::from_secs(DEFAULT_ANALYTICS_RETENTION_DAYS * 86_400),
            ended_meeting_ttl: Duration::from_secs(DEFAULT_ENDED_MEETING_TTL_SECONDS),
        }
    }
}

/// What one retention pass removed. `None` marks a step that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub events_deleted: Option<u64>,
    pub analytics_deleted: Option<u64>,
    pub dedup_evicted: usize,
    pub meetings_evicted: Option<usize>,
    pub tombstones_purged: Option<usize>,
}

impl RetentionReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.events_deleted.is_some()
            && self.analytics_deleted.is_some()
            && self.meetings_evicted.is_some()
            && self.tombstones_purged.is_some()
    }
}

/// Start the retention loop. Returns when `cancel_token` fires.
#[instrument(skip_all, name = "me.task.retention")]
pub async fn start_retention_cleaner(
    store: Arc<dyn DurableStore>,
    gateway: Arc<IngestionGateway>,
    reconciler: ReconcilerHandle,
    config: RetentionConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "me.task.retention",
        interval_secs = config.interval.as_secs(),
        event_retention_secs = config.event_retention.as_secs(),
        analytics_retention_secs = config.analytics_retention.as_secs(),
        "Starting retention cleaner"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_retention(store.as_ref(), &gateway, &reconciler, &config, Utc::now()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "me.task.retention",
                    "Retention cleaner received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// Run a single retention pass as of `now`. Each step runs even if an
/// earlier one failed.
pub async fn run_retention(
    store: &dyn DurableStore,
    gateway: &IngestionGateway,
    reconciler: &ReconcilerHandle,
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> RetentionReport {
    let mut report = RetentionReport::default();

    match store
        .delete_events_before(cutoff_before(now, config.event_retention))
        .await
    {
        Ok(count) => report.events_deleted = Some(count),
        Err(e) => {
            metrics::record_error("purge_events", e.error_type_label());
            error!(target: "me.task.retention", error = %e, "Failed to purge expired events");
        }
    }

    match store
        .delete_analytics_before(cutoff_before(now, config.analytics_retention))
        .await
    {
        Ok(count) => report.analytics_deleted = Some(count),
        Err(e) => {
            metrics::record_error("purge_analytics", e.error_type_label());
            error!(target: "me.task.retention", error = %e, "Failed to purge expired analytics");
        }
    }

    report.dedup_evicted = gateway.evict_expired_dedup(now).await;

    match reconciler
        .evict_ended(cutoff_before(now, config.ended_meeting_ttl))
        .await
    {
        Ok(count) => report.meetings_evicted = Some(count),
        Err(e) => {
            metrics::record_error("evict_meetings", e.error_type_label());
            error!(target: "me.task.retention", error = %e, "Failed to evict ended meetings");
        }
    }

    match reconciler
        .purge_tombstones(cutoff_before(now, config.event_retention))
        .await
    {
        Ok(count) => report.tombstones_purged = Some(count),
        Err(e) => {
            metrics::record_error("purge_tombstones", e.error_type_label());
            error!(target: "me.task.retention", error = %e, "Failed to purge meeting tombstones");
        }
    }

    metrics::record_task_run(
        "retention",
        if report.is_complete() { "success" } else { "error" },
    );
    info!(
        target: "me.task.retention",
        events_deleted = report.events_deleted.unwrap_or(0),
        analytics_deleted = report.analytics_deleted.unwrap_or(0),
        dedup_evicted = report.dedup_evicted,
        meetings_evicted = report.meetings_evicted.unwrap_or(0),
        tombstones_purged = report.tombstones_purged.unwrap_or(0),
        "Retention pass complete"
    );
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{CanonicalEvent, EventEnvelope};
    use crate::state::{StateReconciler, TrackedCounts};
    use crate::store::{AnalyticsMetric, AnalyticsSample, InMemoryStore};
    use chrono::TimeZone;
    use serde_json::Map;

    fn stored_event(id: &str, received_at: DateTime<Utc>) -> CanonicalEvent {
        let envelope = EventEnvelope {
            event_id: Some(id.to_string()),
            event_type: "meeting.started".to_string(),
            event_timestamp: received_at,
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            actor_id: String::new(),
            participant: None,
            payload: Map::new(),
            signature: None,
        };
        CanonicalEvent::from_envelope(envelope, received_at)
    }

    #[tokio::test]
    async fn test_retention_purges_expired_rows_only() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let store = InMemoryStore::new();
        let (gateway, _receiver) = IngestionGateway::new(Duration::from_secs(300), 8);
        let (reconciler, _task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );

        let old = now - chrono::Duration::hours(25);
        let fresh = now - chrono::Duration::hours(1);
        store.upsert_event(&stored_event("old", old)).await.unwrap();
        store.record_outcome("old", true, old).await.unwrap();
        store.upsert_event(&stored_event("fresh", fresh)).await.unwrap();
        store
            .append_analytics(&AnalyticsSample::new(
                AnalyticsMetric::QueueDepth,
                1.0,
                now - chrono::Duration::days(8),
            ))
            .await
            .unwrap();
        store
            .append_analytics(&AnalyticsSample::new(AnalyticsMetric::QueueDepth, 2.0, now))
            .await
            .unwrap();

        let report = run_retention(
            &store,
            &gateway,
            &reconciler,
            &RetentionConfig::default(),
            now,
        )
        .await;

        assert!(report.is_complete());
        assert_eq!(report.events_deleted, Some(1));
        assert_eq!(report.analytics_deleted, Some(1));
        assert_eq!(report.tombstones_purged, Some(0));
        assert!(store.get_event("old").await.unwrap().is_none());
        assert!(store.get_outcome("old").await.unwrap().is_none());
        assert!(store.get_event("fresh").await.unwrap().is_some());
        assert_eq!(store.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retention_reports_unreachable_reconciler() {
        let store = InMemoryStore::new();
        let (gateway, _receiver) = IngestionGateway::new(Duration::from_secs(300), 8);
        let (reconciler, task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );
        reconciler.cancel();
        task.await.unwrap();

        let report = run_retention(
            &store,
            &gateway,
            &reconciler,
            &RetentionConfig::default(),
            Utc::now(),
        )
        .await;

        assert_eq!(report.events_deleted, Some(0));
        assert!(report.meetings_evicted.is_none());
        assert!(report.tombstones_purged.is_none());
        assert!(!report.is_complete());
    }
}
