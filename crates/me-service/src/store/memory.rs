//! Process-local store. Default when no Redis URL is configured.

use super::{without_participants, AnalyticsSample, DurableStore, ProcessingOutcome};
use crate::errors::MeError;
use crate::events::CanonicalEvent;
use crate::state::{MeetingState, ParticipantSnapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    events: HashMap<String, CanonicalEvent>,
    outcomes: HashMap<String, ProcessingOutcome>,
    meetings: HashMap<String, MeetingState>,
    participants: HashMap<String, BTreeMap<String, ParticipantSnapshot>>,
    analytics: Vec<AnalyticsSample>,
}

/// In-memory [`DurableStore`].
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn upsert_event(&self, event: &CanonicalEvent) -> Result<bool, MeError> {
        let mut tables = self.tables.write().await;
        if tables.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        tables
            .events
            .insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CanonicalEvent>, MeError> {
        Ok(self.tables.read().await.events.get(event_id).cloned())
    }

    async fn count_events(&self) -> Result<u64, MeError> {
        Ok(self.tables.read().await.events.len() as u64)
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        processed: bool,
        at: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, MeError> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .outcomes
            .get(event_id)
            .map_or(0, |outcome| outcome.retry_count);
        let outcome = ProcessingOutcome {
            event_id: event_id.to_string(),
            processed,
            retry_count: if processed { previous } else { previous + 1 },
            processed_at: at,
        };
        tables
            .outcomes
            .insert(event_id.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn get_outcome(&self, event_id: &str) -> Result<Option<ProcessingOutcome>, MeError> {
        Ok(self.tables.read().await.outcomes.get(event_id).cloned())
    }

    async fn upsert_meeting_state(&self, meeting: &MeetingState) -> Result<(), MeError> {
        self.tables
            .write()
            .await
            .meetings
            .insert(meeting.meeting_id.clone(), without_participants(meeting));
        Ok(())
    }

    async fn upsert_participant_snapshot(
        &self,
        meeting_id: &str,
        snapshot: &ParticipantSnapshot,
    ) -> Result<(), MeError> {
        self.tables
            .write()
            .await
            .participants
            .entry(meeting_id.to_string())
            .or_default()
            .insert(snapshot.participant_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_meeting_state(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError> {
        let tables = self.tables.read().await;
        Ok(tables.meetings.get(meeting_id).map(|meeting| {
            let mut meeting = meeting.clone();
            if let Some(participants) = tables.participants.get(meeting_id) {
                meeting.participants = participants.clone();
            }
            meeting
        }))
    }

    async fn append_analytics(&self, sample: &AnalyticsSample) -> Result<(), MeError> {
        self.tables.write().await.analytics.push(sample.clone());
        Ok(())
    }

    async fn list_analytics(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsSample>, MeError> {
        let tables = self.tables.read().await;
        let mut samples: Vec<AnalyticsSample> = tables
            .analytics
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        let mut tables = self.tables.write().await;
        let expired: Vec<String> = tables
            .events
            .values()
            .filter(|e| e.receipt_timestamp < cutoff)
            .map(|e| e.event_id.clone())
            .collect();
        for event_id in &expired {
            tables.events.remove(event_id);
            tables.outcomes.remove(event_id);
        }
        Ok(expired.len() as u64)
    }

    async fn delete_analytics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        let mut tables = self.tables.write().await;
        let before = tables.analytics.len();
        tables.analytics.retain(|s| s.timestamp >= cutoff);
        Ok((before - tables.analytics.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::ParticipantDetails;
    use crate::state::MeetingStatus;
    use crate::store::AnalyticsMetric;
    use serde_json::Map;

    fn event(id: &str, received: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            event_id: id.to_string(),
            event_type: "meeting.started".to_string(),
            event_timestamp: received,
            receipt_timestamp: received,
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            actor_id: "u-1".to_string(),
            participant: None,
            payload: Map::new(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_event_ignores_conflict() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        assert!(store.upsert_event(&event("E1", now)).await.unwrap());
        let mut changed = event("E1", now);
        changed.meeting_id = "m-other".to_string();
        assert!(!store.upsert_event(&changed).await.unwrap());

        let stored = store.get_event("E1").await.unwrap().unwrap();
        assert_eq!(stored.meeting_id, "m-1", "First write wins");
        assert_eq!(store.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outcome_retry_count() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let first = store.record_outcome("E1", false, now).await.unwrap();
        assert_eq!(first.retry_count, 1);
        let second = store.record_outcome("E1", false, now).await.unwrap();
        assert_eq!(second.retry_count, 2);
        let done = store.record_outcome("E1", true, now).await.unwrap();
        assert!(done.processed);
        assert_eq!(done.retry_count, 2);

        let ok = store.record_outcome("E2", true, now).await.unwrap();
        assert_eq!(ok.retry_count, 0);
    }

    #[tokio::test]
    async fn test_meeting_state_reassembles_participants() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut meeting = MeetingState::new("m-1", "acct-1", MeetingStatus::Started, now);
        let snapshot = ParticipantSnapshot::joined(
            &ParticipantDetails {
                id: "p-1".to_string(),
                ..Default::default()
            },
            "acct-1",
            now,
        );
        meeting
            .participants
            .insert("p-1".to_string(), snapshot.clone());

        store.upsert_meeting_state(&meeting).await.unwrap();
        store.upsert_participant_snapshot("m-1", &snapshot).await.unwrap();

        let loaded = store.get_meeting_state("m-1").await.unwrap().unwrap();
        assert_eq!(loaded, meeting);
        assert!(store.get_meeting_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_events_before_removes_outcomes() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(25);

        store.upsert_event(&event("old", old)).await.unwrap();
        store.record_outcome("old", true, old).await.unwrap();
        store.upsert_event(&event("new", now)).await.unwrap();

        let deleted = store
            .delete_events_before(now - chrono::Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_event("old").await.unwrap().is_none());
        assert!(store.get_outcome("old").await.unwrap().is_none());
        assert!(store.get_event("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_analytics_retention() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(8);

        store
            .append_analytics(&AnalyticsSample::new(AnalyticsMetric::QueueDepth, 3.0, old))
            .await
            .unwrap();
        store
            .append_analytics(&AnalyticsSample::new(AnalyticsMetric::ActiveMeetings, 1.0, now))
            .await
            .unwrap();

        let deleted = store
            .delete_analytics_before(now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.list_analytics(old).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metric_type, AnalyticsMetric::ActiveMeetings);
    }
}
