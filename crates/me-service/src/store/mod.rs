//! Durable store contract and backends.
//!
//! The processing pipeline is the only writer of events and outcomes; the
//! synchronizer is the only writer of meeting state and participant
//! snapshots; the analytics collector appends samples; the retention
//! cleaner deletes. Backends do not enforce those roles.

pub mod lua_scripts;
pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::errors::MeError;
use crate::events::CanonicalEvent;
use crate::state::{MeetingState, ParticipantSnapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bookkeeping for one event's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub event_id: String,
    pub processed: bool,
    /// Number of failed attempts recorded for this event.
    pub retry_count: u32,
    pub processed_at: DateTime<Utc>,
}

/// Kind of analytics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsMetric {
    /// Events processed per second since the previous tick.
    ProcessingRate,
    ActiveMeetings,
    TrackedParticipants,
    /// Cumulative failed events.
    EventsFailed,
    QueueDepth,
}

impl AnalyticsMetric {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AnalyticsMetric::ProcessingRate => "processing_rate",
            AnalyticsMetric::ActiveMeetings => "active_meetings",
            AnalyticsMetric::TrackedParticipants => "tracked_participants",
            AnalyticsMetric::EventsFailed => "events_failed",
            AnalyticsMetric::QueueDepth => "queue_depth",
        }
    }
}

/// Append-only analytics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSample {
    pub metric_type: AnalyticsMetric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl AnalyticsSample {
    #[must_use]
    pub fn new(metric_type: AnalyticsMetric, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric_type,
            value,
            timestamp,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Durable storage for events, outcomes, meeting state and analytics.
///
/// Meeting state is stored without its participant map; snapshots are
/// stored per participant and reassembled on read.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert the event unless one with the same id exists.
    ///
    /// Returns `true` when the event was inserted, `false` on conflict.
    async fn upsert_event(&self, event: &CanonicalEvent) -> Result<bool, MeError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<CanonicalEvent>, MeError>;

    async fn count_events(&self) -> Result<u64, MeError>;

    /// Record a processing attempt. A failed attempt increments
    /// `retry_count`; a successful one keeps the previous count.
    async fn record_outcome(
        &self,
        event_id: &str,
        processed: bool,
        at: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, MeError>;

    async fn get_outcome(&self, event_id: &str) -> Result<Option<ProcessingOutcome>, MeError>;

    async fn upsert_meeting_state(&self, meeting: &MeetingState) -> Result<(), MeError>;

    async fn upsert_participant_snapshot(
        &self,
        meeting_id: &str,
        snapshot: &ParticipantSnapshot,
    ) -> Result<(), MeError>;

    async fn get_meeting_state(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError>;

    async fn append_analytics(&self, sample: &AnalyticsSample) -> Result<(), MeError>;

    /// Samples with `timestamp >= since`, oldest first.
    async fn list_analytics(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsSample>, MeError>;

    /// Delete events received before `cutoff` together with their outcomes.
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError>;

    async fn delete_analytics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError>;
}

/// Meeting state with the participant map removed, as persisted.
pub(crate) fn without_participants(meeting: &MeetingState) -> MeetingState {
    MeetingState {
        participants: Default::default(),
        ..meeting.clone()
    }
}
