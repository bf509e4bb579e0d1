//! Event engine orchestrator.
//!
//! Wires the gateway, pipeline, reconciler, dispatcher and background tasks
//! together under one root cancellation token and exposes the operational
//! surface.
//!
//! # Shutdown order
//!
//! 1. Readiness off, gateway closed (new envelopes rejected as draining)
//! 2. Pipeline drains queued events within `shutdown_drain`
//! 3. Background tasks cancelled
//! 4. Final state flush to the durable store
//! 5. Reconciler stopped

use crate::broadcast::{
    BroadcastDispatcher, BroadcastScope, LocalSubscriberHub, SubscriberChannel, Subscription,
};
use crate::config::Config;
use crate::errors::MeError;
use crate::events::EventEnvelope;
use crate::ingest::{IngestOutcome, IngestionGateway};
use crate::observability::HealthState;
use crate::pipeline::{
    run_pipeline, EngineStatistics, EventProcessor, PipelineConfig, PipelineReport,
    ProcessingStats,
};
use crate::state::{
    MeetingState, ParticipantSnapshot, ReconcilerHandle, StateReconciler, TrackedCounts,
};
use crate::store::{DurableStore, InMemoryStore, RedisStore};
use crate::tasks::{
    run_state_sync, start_analytics_collector, start_retention_cleaner, start_state_sync,
    AnalyticsCollector, AnalyticsConfig, RetentionConfig, StateSyncConfig, SyncReport,
};

use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Build the durable store selected by `config`: Redis when a URL is set,
/// otherwise in-memory.
///
/// # Errors
///
/// Returns `MeError::Store` when Redis is configured but unreachable.
pub async fn build_store(config: &Config) -> Result<Arc<dyn DurableStore>, MeError> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url.expose_secret()).await?;
            info!(target: "me.engine", backend = "redis", "Durable store connected");
            Ok(Arc::new(store))
        }
        None => {
            info!(target: "me.engine", backend = "memory", "Using in-memory durable store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pipeline: PipelineReport,
    /// `None` when the final flush could not reach the reconciler.
    pub final_sync: Option<SyncReport>,
}

struct Tasks {
    pipeline: JoinHandle<PipelineReport>,
    background: Vec<JoinHandle<()>>,
    reconciler: JoinHandle<()>,
}

/// The running engine.
pub struct EventEngine {
    gateway: Arc<IngestionGateway>,
    reconciler: ReconcilerHandle,
    store: Arc<dyn DurableStore>,
    stats: Arc<ProcessingStats>,
    counts: Arc<TrackedCounts>,
    health: Arc<HealthState>,
    hub: Option<Arc<LocalSubscriberHub>>,
    root_token: CancellationToken,
    pipeline_token: CancellationToken,
    tasks_token: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl EventEngine {
    /// Start the engine with the in-process subscriber hub.
    #[must_use]
    pub fn start_with_local_hub(config: &Config, store: Arc<dyn DurableStore>) -> Self {
        let hub = Arc::new(LocalSubscriberHub::default());
        let channel: Arc<dyn SubscriberChannel> = hub.clone();
        let mut engine = Self::start(config, store, channel);
        engine.hub = Some(hub);
        engine
    }

    /// Start the engine, spawning the consumer loop, the reconciler and the
    /// background tasks. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(
        config: &Config,
        store: Arc<dyn DurableStore>,
        channel: Arc<dyn SubscriberChannel>,
    ) -> Self {
        let root_token = CancellationToken::new();
        let pipeline_token = root_token.child_token();
        let tasks_token = root_token.child_token();

        let counts = TrackedCounts::new();
        let stats = ProcessingStats::new();

        let (reconciler, reconciler_task) = StateReconciler::spawn(
            config.participant_grace_period,
            Arc::clone(&counts),
            root_token.child_token(),
        );

        let (gateway, receiver) = IngestionGateway::new(config.dedup_window, config.queue_capacity);
        let gateway = Arc::new(gateway);
        let queue_monitor = Arc::clone(receiver.monitor());

        let processor = EventProcessor::new(
            Arc::clone(&store),
            reconciler.clone(),
            BroadcastDispatcher::new(channel),
            Arc::clone(&stats),
        );
        let pipeline = tokio::spawn(run_pipeline(
            processor,
            receiver,
            PipelineConfig {
                dequeue_timeout: config.dequeue_timeout,
                drain_timeout: config.shutdown_drain,
            },
            pipeline_token.clone(),
        ));

        let background = vec![
            tokio::spawn(start_state_sync(
                Arc::clone(&store),
                reconciler.clone(),
                StateSyncConfig {
                    interval: config.sync_interval,
                },
                tasks_token.child_token(),
            )),
            tokio::spawn(start_analytics_collector(
                AnalyticsCollector::new(
                    Arc::clone(&store),
                    Arc::clone(&stats),
                    Arc::clone(&counts),
                    queue_monitor,
                ),
                AnalyticsConfig {
                    interval: config.analytics_interval,
                },
                tasks_token.child_token(),
            )),
            tokio::spawn(start_retention_cleaner(
                Arc::clone(&store),
                Arc::clone(&gateway),
                reconciler.clone(),
                RetentionConfig {
                    interval: config.retention_interval,
                    event_retention: config.event_retention,
                    analytics_retention: config.analytics_retention,
                    ended_meeting_ttl: config.ended_meeting_ttl,
                },
                tasks_token.child_token(),
            )),
        ];

        let health = Arc::new(HealthState::new());
        health.set_ready();

        info!(
            target: "me.engine",
            instance_id = %config.instance_id,
            queue_capacity = config.queue_capacity,
            dedup_window_secs = config.dedup_window.as_secs(),
            "Event engine started"
        );

        Self {
            gateway,
            reconciler,
            store,
            stats,
            counts,
            health,
            hub: None,
            root_token,
            pipeline_token,
            tasks_token,
            tasks: Mutex::new(Some(Tasks {
                pipeline,
                background,
                reconciler: reconciler_task,
            })),
        }
    }

    /// Submit an envelope, reporting exactly what happened to it.
    pub async fn submit(&self, envelope: EventEnvelope) -> IngestOutcome {
        self.gateway.submit(envelope).await
    }

    /// Event Source entry point. `false` means the caller must retry.
    pub async fn accept(&self, envelope: EventEnvelope) -> bool {
        self.gateway.accept(envelope).await
    }

    #[must_use]
    pub fn get_statistics(&self) -> EngineStatistics {
        let counts = self.counts.snapshot();
        EngineStatistics {
            events_processed: self.stats.processed(),
            events_failed: self.stats.failed(),
            events_unmapped: self.stats.unmapped(),
            meetings_tracked: counts.meetings_tracked,
            meetings_active: counts.meetings_active,
            participants_tracked: counts.participants_tracked,
            average_processing_time: self.stats.average_processing_ms(),
            last_event_time: self.stats.last_event_time(),
            queue: self.gateway.queue_snapshot(),
            ingest: self.gateway.counters(),
        }
    }

    /// Live state of a meeting.
    ///
    /// # Errors
    ///
    /// Returns `MeError::Internal` if the reconciler has stopped.
    pub async fn get_meeting_state(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError> {
        self.reconciler.get_meeting(meeting_id).await
    }

    /// Live snapshot of one participant.
    ///
    /// # Errors
    ///
    /// Returns `MeError::Internal` if the reconciler has stopped.
    pub async fn get_participant_state(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantSnapshot>, MeError> {
        self.reconciler
            .get_participant(meeting_id, participant_id)
            .await
    }

    /// Subscribe to a scope on the in-process hub, if the engine has one.
    pub async fn subscribe(&self, scope: BroadcastScope) -> Option<Subscription> {
        match &self.hub {
            Some(hub) => Some(hub.subscribe(scope).await),
            None => None,
        }
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<IngestionGateway> {
        &self.gateway
    }

    #[must_use]
    pub fn reconciler(&self) -> &ReconcilerHandle {
        &self.reconciler
    }

    /// Token cancelled when shutdown completes.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root_token.clone()
    }

    /// Graceful shutdown. Subsequent calls return `None`.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        let tasks = self.tasks.lock().await.take()?;

        info!(target: "me.engine", "Event engine shutting down");
        self.health.set_draining();
        self.gateway.close().await;

        self.pipeline_token.cancel();
        let pipeline = match tasks.pipeline.await {
            Ok(report) => report,
            Err(e) => {
                error!(target: "me.engine", error = %e, "Pipeline task failed");
                PipelineReport::default()
            }
        };

        self.tasks_token.cancel();
        for handle in tasks.background {
            if let Err(e) = handle.await {
                warn!(target: "me.engine", error = %e, "Background task failed");
            }
        }

        let final_sync = match run_state_sync(self.store.as_ref(), &self.reconciler).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(target: "me.engine", error = %e, "Final state sync failed");
                None
            }
        };

        self.reconciler.cancel();
        if let Err(e) = tasks.reconciler.await {
            warn!(target: "me.engine", error = %e, "Reconciler task failed");
        }
        self.root_token.cancel();

        info!(
            target: "me.engine",
            handled = pipeline.handled,
            unprocessed = pipeline.unprocessed,
            "Event engine stopped"
        );
        Some(ShutdownReport {
            pipeline,
            final_sync,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::RejectReason;
    use crate::state::MeetingStatus;
    use chrono::Utc;
    use serde_json::Map;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            dequeue_timeout: Duration::from_millis(20),
            ..Config::default()
        }
    }

    fn envelope(id: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: Some(id.to_string()),
            event_type: event_type.to_string(),
            event_timestamp: Utc::now(),
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            actor_id: "u-1".to_string(),
            participant: None,
            payload: Map::new(),
            signature: None,
        }
    }

    async fn wait_for_processed(engine: &EventEngine, count: u64) {
        let handled = |engine: &EventEngine| {
            let stats = engine.get_statistics();
            stats.events_processed + stats.events_failed
        };
        for _ in 0..200 {
            if handled(engine) >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handled(engine) >= count, "events not processed in time");
    }

    #[tokio::test]
    async fn test_engine_processes_and_reports_statistics() {
        let engine =
            EventEngine::start_with_local_hub(&test_config(), Arc::new(InMemoryStore::new()));
        assert!(engine.health().is_ready());

        assert!(engine.accept(envelope("E1", "meeting.started")).await);
        wait_for_processed(&engine, 1).await;

        let meeting = engine.get_meeting_state("m-1").await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Started);
        let stats = engine.get_statistics();
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.meetings_tracked, 1);
        assert!(stats.last_event_time.is_some());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_events_and_flushes_state() {
        let store = Arc::new(InMemoryStore::new());
        let engine = EventEngine::start_with_local_hub(&test_config(), store.clone());

        assert!(engine.accept(envelope("E1", "meeting.started")).await);
        let report = engine.shutdown().await.unwrap();

        assert_eq!(report.pipeline.unprocessed, 0);
        assert_eq!(report.final_sync.unwrap().meetings_synced, 1);
        assert!(!engine.health().is_ready());
        assert!(store.get_meeting_state("m-1").await.unwrap().is_some());

        let outcome = engine.submit(envelope("E2", "meeting.ended")).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected {
                reason: RejectReason::Draining,
                ..
            }
        ));
        assert!(engine.shutdown().await.is_none());
        assert!(engine.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_subscribe_requires_local_hub() {
        let hub: Arc<dyn SubscriberChannel> = Arc::new(LocalSubscriberHub::default());
        let engine = EventEngine::start(&test_config(), Arc::new(InMemoryStore::new()), hub);
        assert!(engine
            .subscribe(BroadcastScope::meeting("m-1"))
            .await
            .is_none());
        engine.shutdown().await.unwrap();
    }
}
