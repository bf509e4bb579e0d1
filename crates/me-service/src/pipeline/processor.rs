//! Event Processing Pipeline.
//!
//! Single consumer of the ingestion queue. Per event:
//!
//! 1. Persist the raw canonical event (ignore on conflict)
//! 2. Map the provider type to the internal taxonomy; unmapped types are
//!    counted and dropped
//! 3. Apply the transition through the reconciler, broadcast if applied
//! 4. Record the processing outcome
//!
//! A failure in steps 1-3 is isolated to that event: the outcome is recorded
//! as failed and the loop moves on. There is no automatic retry.
//!
//! # Shutdown
//!
//! Once the cancellation token fires the loop stops waiting on the queue and
//! drains what is already queued until the drain deadline. Events still queued
//! after the deadline are logged by id and reported as unprocessed.

use super::stats::ProcessingStats;
use crate::broadcast::BroadcastDispatcher;
use crate::errors::MeError;
use crate::events::{map_event_type, CanonicalEvent, EventMapping, InternalEvent};
use crate::ingest::{Dequeue, QueueReceiver};
use crate::observability::metrics;
use crate::state::{IgnoreReason, ReconcilerHandle, TransitionContext, TransitionOutcome};
use crate::store::DurableStore;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one dequeued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Transition applied and broadcast.
    Applied,
    /// Transition rejected by the reconciler; not broadcast.
    Ignored(IgnoreReason),
    /// Provider type has no internal mapping.
    Unmapped,
    Failed,
}

impl ProcessResult {
    fn metric_status(self) -> &'static str {
        match self {
            ProcessResult::Applied | ProcessResult::Ignored(_) => "success",
            ProcessResult::Unmapped => "unmapped",
            ProcessResult::Failed => "failure",
        }
    }
}

/// Pipeline timing.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// How long one dequeue waits before re-checking for shutdown.
    pub dequeue_timeout: Duration,
    /// Upper bound on draining queued events after shutdown begins.
    pub drain_timeout: Duration,
}

/// Counts reported when the consumer loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Events handled by the loop, including the drain phase.
    pub handled: u64,
    /// Events handled during the drain phase.
    pub drained: u64,
    /// Events left in the queue when the drain deadline passed.
    pub unprocessed: u64,
}

/// Processes canonical events one at a time.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn DurableStore>,
    reconciler: ReconcilerHandle,
    dispatcher: BroadcastDispatcher,
    stats: Arc<ProcessingStats>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        reconciler: ReconcilerHandle,
        dispatcher: BroadcastDispatcher,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        Self {
            store,
            reconciler,
            dispatcher,
            stats,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    /// Run one event through the pipeline. Never returns an error; failures
    /// are recorded against the event.
    pub async fn process(&self, event: CanonicalEvent) -> ProcessResult {
        let start = Instant::now();

        let result = match self.handle(&event).await {
            Ok(result) => {
                if let Err(e) = self
                    .store
                    .record_outcome(&event.event_id, true, Utc::now())
                    .await
                {
                    self.fail(&event, "record_outcome", &e).await;
                    ProcessResult::Failed
                } else {
                    result
                }
            }
            Err((operation, e)) => {
                self.fail(&event, operation, &e).await;
                ProcessResult::Failed
            }
        };

        let elapsed = start.elapsed();
        let now = Utc::now();
        match result {
            ProcessResult::Failed => self.stats.record_failed(elapsed, now),
            _ => self.stats.record_processed(elapsed, now),
        }
        metrics::record_event_processed(result.metric_status(), elapsed);

        result
    }

    async fn handle(
        &self,
        event: &CanonicalEvent,
    ) -> Result<ProcessResult, (&'static str, MeError)> {
        let inserted = self
            .store
            .upsert_event(event)
            .await
            .map_err(|e| ("persist_event", e))?;
        if !inserted {
            debug!(
                target: "me.pipeline",
                event_id = %event.event_id,
                "Event already stored, reprocessing"
            );
        }

        let (kind, implied) = match map_event_type(&event.event_type) {
            EventMapping::Mapped { kind, implied } => (kind, implied),
            EventMapping::Unmapped => {
                info!(
                    target: "me.pipeline",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Unmapped event type dropped"
                );
                metrics::record_unmapped_event();
                self.stats.record_unmapped();
                return Ok(ProcessResult::Unmapped);
            }
        };

        let internal =
            InternalEvent::from_canonical(event, kind, implied).map_err(|e| ("map_event", e))?;

        let context = TransitionContext {
            event_id: event.event_id.clone(),
            meeting_id: event.meeting_id.clone(),
            account_id: event.account_id.clone(),
            event_timestamp: event.event_timestamp,
        };

        let outcome = self
            .reconciler
            .apply(context.clone(), internal.clone())
            .await
            .map_err(|e| ("apply_transition", e))?;

        match outcome {
            TransitionOutcome::Applied => {
                self.dispatcher.broadcast_applied(&context, &internal).await;
                Ok(ProcessResult::Applied)
            }
            TransitionOutcome::Ignored { reason } => Ok(ProcessResult::Ignored(reason)),
        }
    }

    async fn fail(&self, event: &CanonicalEvent, operation: &'static str, e: &MeError) {
        metrics::record_error(operation, e.error_type_label());
        warn!(
            target: "me.pipeline",
            event_id = %event.event_id,
            event_type = %event.event_type,
            meeting_id = %event.meeting_id,
            operation = operation,
            error = %e,
            "Event processing failed"
        );

        if let Err(record_err) = self
            .store
            .record_outcome(&event.event_id, false, Utc::now())
            .await
        {
            error!(
                target: "me.pipeline",
                event_id = %event.event_id,
                error = %record_err,
                "Failed to record failed outcome"
            );
        }
    }
}

/// Run the consumer loop until the queue closes or `cancel_token` fires,
/// then drain within `config.drain_timeout`.
#[instrument(skip_all, name = "me.pipeline")]
pub async fn run_pipeline(
    processor: EventProcessor,
    mut receiver: QueueReceiver,
    config: PipelineConfig,
    cancel_token: CancellationToken,
) -> PipelineReport {
    info!(
        target: "me.pipeline",
        dequeue_timeout_ms = u64::try_from(config.dequeue_timeout.as_millis()).unwrap_or(u64::MAX),
        drain_timeout_secs = config.drain_timeout.as_secs(),
        "Processing pipeline started"
    );

    let mut report = PipelineReport::default();

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                debug!(target: "me.pipeline", "Processing pipeline received shutdown signal");
                break;
            }
            dequeued = receiver.recv_timeout(config.dequeue_timeout) => {
                match dequeued {
                    Dequeue::Event(event) => {
                        processor.process(*event).await;
                        report.handled += 1;
                        metrics::set_queue_depth(receiver.monitor().current_depth());
                    }
                    Dequeue::Timeout => {}
                    Dequeue::Closed => {
                        debug!(target: "me.pipeline", "Ingestion queue closed");
                        break;
                    }
                }
            }
        }
    }

    drain(&processor, &mut receiver, config.drain_timeout, &mut report).await;
    metrics::set_queue_depth(receiver.monitor().current_depth());

    info!(
        target: "me.pipeline",
        handled = report.handled,
        drained = report.drained,
        unprocessed = report.unprocessed,
        "Processing pipeline stopped"
    );
    report
}

/// Process whatever is already queued until empty or `deadline` elapses.
async fn drain(
    processor: &EventProcessor,
    receiver: &mut QueueReceiver,
    drain_timeout: Duration,
    report: &mut PipelineReport,
) {
    let deadline = Instant::now() + drain_timeout;

    while Instant::now() < deadline {
        let Some(event) = receiver.try_recv() else {
            return;
        };
        processor.process(event).await;
        report.handled += 1;
        report.drained += 1;
    }

    while let Some(event) = receiver.try_recv() {
        report.unprocessed += 1;
        warn!(
            target: "me.pipeline",
            event_id = %event.event_id,
            event_type = %event.event_type,
            meeting_id = %event.meeting_id,
            "Event left unprocessed at shutdown"
        );
    }
}
