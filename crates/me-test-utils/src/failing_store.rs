//! Durable store wrapper with switchable failures.
//!
//! Delegates to `InMemoryStore` unless the matching failure switch is on,
//! in which case the call returns `MeError::Store`.
//!
//! # Example
//!
//! ```rust,ignore
//! use me_test_utils::FailingStore;
//!
//! let store = FailingStore::new();
//! store.fail_event_writes(true);
//! assert!(store.upsert_event(&event).await.is_err());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use me_service::errors::MeError;
use me_service::events::CanonicalEvent;
use me_service::state::{MeetingState, ParticipantSnapshot};
use me_service::store::{AnalyticsSample, DurableStore, InMemoryStore, ProcessingOutcome};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    fail_event_writes: AtomicBool,
    fail_state_writes: AtomicBool,
    fail_analytics: AtomicBool,
    injected_failures: AtomicU64,
}

impl FailingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `upsert_event`.
    pub fn fail_event_writes(&self, fail: bool) {
        self.fail_event_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail meeting state and participant snapshot upserts.
    pub fn fail_state_writes(&self, fail: bool) {
        self.fail_state_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail analytics appends.
    pub fn fail_analytics(&self, fail: bool) {
        self.fail_analytics.store(fail, Ordering::SeqCst);
    }

    /// Number of calls that returned an injected error.
    pub fn injected_failures(&self) -> u64 {
        self.injected_failures.load(Ordering::SeqCst)
    }

    /// The underlying store, bypassing failure injection.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, switch: &AtomicBool, operation: &str) -> Result<(), MeError> {
        if switch.load(Ordering::SeqCst) {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
            return Err(MeError::Store(format!("injected failure: {operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FailingStore {
    async fn upsert_event(&self, event: &CanonicalEvent) -> Result<bool, MeError> {
        self.check(&self.fail_event_writes, "upsert_event")?;
        self.inner.upsert_event(event).await
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CanonicalEvent>, MeError> {
        self.inner.get_event(event_id).await
    }

    async fn count_events(&self) -> Result<u64, MeError> {
        self.inner.count_events().await
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        processed: bool,
        at: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, MeError> {
        self.inner.record_outcome(event_id, processed, at).await
    }

    async fn get_outcome(&self, event_id: &str) -> Result<Option<ProcessingOutcome>, MeError> {
        self.inner.get_outcome(event_id).await
    }

    async fn upsert_meeting_state(&self, meeting: &MeetingState) -> Result<(), MeError> {
        self.check(&self.fail_state_writes, "upsert_meeting_state")?;
        self.inner.upsert_meeting_state(meeting).await
    }

    async fn upsert_participant_snapshot(
        &self,
        meeting_id: &str,
        snapshot: &ParticipantSnapshot,
    ) -> Result<(), MeError> {
        self.check(&self.fail_state_writes, "upsert_participant_snapshot")?;
        self.inner
            .upsert_participant_snapshot(meeting_id, snapshot)
            .await
    }

    async fn get_meeting_state(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError> {
        self.inner.get_meeting_state(meeting_id).await
    }

    async fn append_analytics(&self, sample: &AnalyticsSample) -> Result<(), MeError> {
        self.check(&self.fail_analytics, "append_analytics")?;
        self.inner.append_analytics(sample).await
    }

    async fn list_analytics(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsSample>, MeError> {
        self.inner.list_analytics(since).await
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        self.inner.delete_events_before(cutoff).await
    }

    async fn delete_analytics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        self.inner.delete_analytics_before(cutoff).await
    }
}
