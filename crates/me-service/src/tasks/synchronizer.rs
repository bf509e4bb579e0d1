//! State synchronizer background task.
//!
//! Periodically flushes every in-memory meeting state and its participant
//! snapshots to the durable store. A meeting that fails to persist is logged
//! and picked up again on the next tick.

use crate::errors::MeError;
use crate::observability::metrics;
use crate::state::ReconcilerHandle;
use crate::store::DurableStore;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Synchronizer configuration.
#[derive(Debug, Clone)]
pub struct StateSyncConfig {
    pub interval: Duration,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_SYNC_INTERVAL_SECONDS),
        }
    }
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub meetings_synced: usize,
    pub participants_synced: usize,
    pub meetings_failed: usize,
}

/// Start the synchronizer loop. Returns when `cancel_token` fires.
#[instrument(skip_all, name = "me.task.sync")]
pub async fn start_state_sync(
    store: Arc<dyn DurableStore>,
    reconciler: ReconcilerHandle,
    config: StateSyncConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "me.task.sync",
        interval_secs = config.interval.as_secs(),
        "Starting state synchronizer"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_state_sync(store.as_ref(), &reconciler).await {
                    Ok(report) => {
                        let status = if report.meetings_failed == 0 { "success" } else { "error" };
                        metrics::record_task_run("sync", status);
                    }
                    Err(e) => {
                        metrics::record_task_run("sync", "error");
                        warn!(target: "me.task.sync", error = %e, "State snapshot unavailable");
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "me.task.sync",
                    "State synchronizer received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// Flush every live meeting once.
///
/// # Errors
///
/// Returns an error only when the reconciler cannot be reached; store
/// failures are counted per meeting.
pub async fn run_state_sync(
    store: &dyn DurableStore,
    reconciler: &ReconcilerHandle,
) -> Result<SyncReport, MeError> {
    let meetings = reconciler.snapshot_all().await?;
    let mut report = SyncReport::default();

    for meeting in &meetings {
        if let Err(e) = store.upsert_meeting_state(meeting).await {
            report.meetings_failed += 1;
            metrics::record_error("sync_meeting", e.error_type_label());
            warn!(
                target: "me.task.sync",
                meeting_id = %meeting.meeting_id,
                error = %e,
                "Failed to persist meeting state"
            );
            continue;
        }

        let mut failed = false;
        for snapshot in meeting.participants.values() {
            match store
                .upsert_participant_snapshot(&meeting.meeting_id, snapshot)
                .await
            {
                Ok(()) => report.participants_synced += 1,
                Err(e) => {
                    failed = true;
                    metrics::record_error("sync_participant", e.error_type_label());
                    warn!(
                        target: "me.task.sync",
                        meeting_id = %meeting.meeting_id,
                        participant_id = %snapshot.participant_id,
                        error = %e,
                        "Failed to persist participant snapshot"
                    );
                }
            }
        }

        if failed {
            report.meetings_failed += 1;
        } else {
            report.meetings_synced += 1;
        }
    }

    debug!(
        target: "me.task.sync",
        meetings_synced = report.meetings_synced,
        participants_synced = report.participants_synced,
        meetings_failed = report.meetings_failed,
        "State sync pass complete"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{InternalEvent, ParticipantDetails};
    use crate::state::{MeetingStatus, StateReconciler, TrackedCounts, TransitionContext};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use serde_json::Map;

    fn context(event_id: &str) -> TransitionContext {
        TransitionContext {
            event_id: event_id.to_string(),
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            event_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sync_persists_meeting_and_participants() {
        let store = InMemoryStore::new();
        let (reconciler, _task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );
        reconciler
            .apply(
                context("E1"),
                InternalEvent::MeetingStarted {
                    topic: Some("Standup".to_string()),
                    host_id: Some("u-1".to_string()),
                    settings: Map::new(),
                },
            )
            .await
            .unwrap();
        reconciler
            .apply(
                context("E2"),
                InternalEvent::ParticipantJoined {
                    participant: ParticipantDetails {
                        id: "p-1".to_string(),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();

        let report = run_state_sync(&store, &reconciler).await.unwrap();

        assert_eq!(report.meetings_synced, 1);
        assert_eq!(report.participants_synced, 1);
        let stored = store.get_meeting_state("m-1").await.unwrap().unwrap();
        assert_eq!(stored.status, MeetingStatus::Started);
        assert_eq!(stored.topic.as_deref(), Some("Standup"));
        assert!(stored.participants.contains_key("p-1"));
    }

    #[tokio::test]
    async fn test_redelivery_after_eviction_keeps_stored_meeting_ended() {
        let store = InMemoryStore::new();
        let (reconciler, _task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );
        let start = || InternalEvent::MeetingStarted {
            topic: Some("Standup".to_string()),
            host_id: None,
            settings: Map::new(),
        };
        let join = || InternalEvent::ParticipantJoined {
            participant: ParticipantDetails {
                id: "p-1".to_string(),
                ..Default::default()
            },
        };

        reconciler.apply(context("E1"), start()).await.unwrap();
        reconciler
            .apply(context("E2"), InternalEvent::MeetingEnded)
            .await
            .unwrap();
        run_state_sync(&store, &reconciler).await.unwrap();
        reconciler
            .evict_ended(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let redelivered = reconciler.apply(context("E1"), start()).await.unwrap();
        assert!(!redelivered.is_applied());
        assert!(!reconciler
            .apply(context("E3"), join())
            .await
            .unwrap()
            .is_applied());

        let report = run_state_sync(&store, &reconciler).await.unwrap();
        assert_eq!(report.meetings_synced, 0);
        let stored = store.get_meeting_state("m-1").await.unwrap().unwrap();
        assert_eq!(stored.status, MeetingStatus::Ended);
        assert!(stored.participants.is_empty());
    }

    #[tokio::test]
    async fn test_sync_with_no_meetings() {
        let store = InMemoryStore::new();
        let (reconciler, _task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );

        let report = run_state_sync(&store, &reconciler).await.unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn test_sync_fails_when_reconciler_stopped() {
        let store = InMemoryStore::new();
        let cancel_token = CancellationToken::new();
        let (reconciler, task) =
            StateReconciler::spawn(Duration::from_secs(300), TrackedCounts::new(), cancel_token);
        reconciler.cancel();
        task.await.unwrap();

        assert!(run_state_sync(&store, &reconciler).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_loop_exits_on_cancel() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let (reconciler, _task) = StateReconciler::spawn(
            Duration::from_secs(300),
            TrackedCounts::new(),
            CancellationToken::new(),
        );
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(start_state_sync(
            store,
            reconciler,
            StateSyncConfig {
                interval: Duration::from_secs(30),
            },
            cancel_token.clone(),
        ));

        tokio::time::advance(Duration::from_secs(61)).await;
        cancel_token.cancel();
        handle.await.unwrap();
    }
}
