//! Event Ingestion Gateway.
//!
//! Entry point for the Event Source. For each envelope:
//!
//! 1. Derive the `event_id` (provider id or deterministic synthesized id)
//! 2. Return `Duplicate` if the id was seen within the dedup window
//! 3. Try to enqueue; on success record the id, on a full queue reject
//!    without recording so the caller's retry is not mistaken for a duplicate
//!
//! Steps 2 and 3 run under one lock: two concurrent submissions of the same
//! id cannot both reach the queue.

use super::dedup::DedupRegistry;
use super::queue::{self, EnqueueError, QueueMonitor, QueueReceiver, QueueSender, QueueSnapshot};
use crate::events::{CanonicalEvent, EventEnvelope};
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why an envelope was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Queue at capacity; the caller should retry.
    QueueFull,
    /// Engine is shutting down.
    Draining,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QueueFull => "queue_full",
            RejectReason::Draining => "draining",
        }
    }
}

/// Detailed result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { event_id: String },
    /// Seen within the window; acknowledged without re-enqueueing.
    Duplicate { event_id: String },
    Rejected {
        event_id: String,
        reason: RejectReason,
    },
}

impl IngestOutcome {
    /// The boolean the Event Source sees: duplicates count as accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, IngestOutcome::Rejected { .. })
    }

    #[must_use]
    pub fn event_id(&self) -> &str {
        match self {
            IngestOutcome::Accepted { event_id }
            | IngestOutcome::Duplicate { event_id }
            | IngestOutcome::Rejected { event_id, .. } => event_id,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted { .. } => "accepted",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::Rejected {
                reason: RejectReason::QueueFull,
                ..
            } => "rejected_queue_full",
            IngestOutcome::Rejected {
                reason: RejectReason::Draining,
                ..
            } => "rejected_draining",
        }
    }
}

/// Gateway counters.
#[derive(Debug, Default)]
pub struct IngestCounters {
    received: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time view of [`IngestCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

impl IngestCounters {
    fn record(&self, outcome: &IngestOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            IngestOutcome::Accepted { .. } => &self.accepted,
            IngestOutcome::Duplicate { .. } => &self.duplicates,
            IngestOutcome::Rejected { .. } => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct GatewayState {
    registry: DedupRegistry,
    /// `None` once closed; dropping the sender lets the consumer observe
    /// the end of the queue after draining it.
    sender: Option<QueueSender>,
}

/// Ingestion gateway. Sole writer of dedup records.
pub struct IngestionGateway {
    state: Mutex<GatewayState>,
    monitor: Arc<QueueMonitor>,
    counters: IngestCounters,
}

impl IngestionGateway {
    /// Create a gateway and the consumer half of its queue.
    #[must_use]
    pub fn new(dedup_window: Duration, queue_capacity: usize) -> (Self, QueueReceiver) {
        let (sender, receiver) = queue::bounded(queue_capacity);
        let gateway = Self {
            state: Mutex::new(GatewayState {
                registry: DedupRegistry::new(dedup_window),
                sender: Some(sender),
            }),
            monitor: Arc::clone(receiver.monitor()),
            counters: IngestCounters::default(),
        };
        (gateway, receiver)
    }

    /// Submit an envelope received now.
    pub async fn submit(&self, envelope: EventEnvelope) -> IngestOutcome {
        self.submit_at(envelope, Utc::now()).await
    }

    /// Submit an envelope with an explicit receipt time.
    pub async fn submit_at(
        &self,
        envelope: EventEnvelope,
        received_at: DateTime<Utc>,
    ) -> IngestOutcome {
        let event = CanonicalEvent::from_envelope(envelope, received_at);
        let event_id = event.event_id.clone();

        let outcome = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.registry.maybe_evict(received_at);

            if state.registry.is_duplicate(&event_id, received_at) {
                IngestOutcome::Duplicate { event_id }
            } else {
                match state.sender.as_ref() {
                    None => IngestOutcome::Rejected {
                        event_id,
                        reason: RejectReason::Draining,
                    },
                    Some(sender) => match sender.try_enqueue(event) {
                        Ok(()) => {
                            state.registry.record(event_id.clone(), received_at);
                            IngestOutcome::Accepted { event_id }
                        }
                        Err(EnqueueError::Full(_)) => IngestOutcome::Rejected {
                            event_id,
                            reason: RejectReason::QueueFull,
                        },
                        Err(EnqueueError::Closed(_)) => IngestOutcome::Rejected {
                            event_id,
                            reason: RejectReason::Draining,
                        },
                    },
                }
            }
        };

        self.counters.record(&outcome);
        metrics::record_ingest(outcome.metric_label());
        metrics::set_queue_depth(self.monitor.current_depth());

        match &outcome {
            IngestOutcome::Accepted { event_id } => debug!(
                target: "me.ingest",
                event_id = %event_id,
                queue_depth = self.monitor.current_depth(),
                "Event accepted"
            ),
            IngestOutcome::Duplicate { event_id } => debug!(
                target: "me.ingest",
                event_id = %event_id,
                "Duplicate event absorbed"
            ),
            IngestOutcome::Rejected { event_id, reason } => warn!(
                target: "me.ingest",
                event_id = %event_id,
                reason = reason.as_str(),
                queue_depth = self.monitor.current_depth(),
                "Event rejected"
            ),
        }

        outcome
    }

    /// `true` when the envelope was enqueued or is a duplicate.
    pub async fn accept(&self, envelope: EventEnvelope) -> bool {
        self.submit(envelope).await.is_accepted()
    }

    /// Stop accepting events. Already-queued events stay for the consumer.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.sender.take().is_some() {
            info!(
                target: "me.ingest",
                queue_depth = self.monitor.current_depth(),
                "Ingestion gateway closed"
            );
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.sender.is_none()
    }

    /// Drop dedup records older than the window.
    pub async fn evict_expired_dedup(&self, now: DateTime<Utc>) -> usize {
        self.state.lock().await.registry.evict_expired(now)
    }

    pub async fn dedup_len(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    pub async fn is_recorded(&self, event_id: &str) -> bool {
        self.state.lock().await.registry.contains(event_id)
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.monitor.current_depth()
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.monitor.snapshot()
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.monitor.capacity()
    }

    #[must_use]
    pub fn counters(&self) -> IngestSnapshot {
        self.counters.snapshot()
    }
}
