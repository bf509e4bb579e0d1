//! Pre-configured test data fixtures for ME testing.
//!
//! Provides builders for:
//! - Provider envelopes (`TestEnvelope` plus per-type shorthands)
//! - Participants with different roles and media state
//! - Engine configuration tuned for fast tests

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use me_service::config::Config;
use me_service::engine::EventEngine;
use me_service::events::{EventEnvelope, ParticipantDetails};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Default account for fixtures.
pub const TEST_ACCOUNT_ID: &str = "acct-test";

/// Fixed base time so durations in assertions are exact.
#[must_use]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// `base_time()` plus `seconds`.
#[must_use]
pub fn at_offset(seconds: i64) -> DateTime<Utc> {
    base_time() + ChronoDuration::seconds(seconds)
}

/// Engine configuration with short waits for tests.
#[must_use]
pub fn test_config() -> Config {
    Config {
        dequeue_timeout: Duration::from_millis(10),
        shutdown_drain: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Wait until the engine has handled (processed or failed) `count` events.
///
/// # Panics
///
/// Panics after roughly two seconds.
pub async fn wait_until_handled(engine: &EventEngine, count: u64) {
    for _ in 0..400 {
        let stats = engine.get_statistics();
        if stats.events_processed + stats.events_failed >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = engine.get_statistics();
    panic!(
        "expected {count} handled events, got processed={} failed={}",
        stats.events_processed, stats.events_failed
    );
}

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    pub participant_id: String,
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub is_host: bool,
    pub is_co_host: bool,
}

impl TestParticipant {
    /// Create a new test participant with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            participant_id: format!("part-{}", Uuid::new_v4()),
            user_id: format!("user-{}", Uuid::new_v4()),
            name: name.into(),
            email: None,
            is_host: false,
            is_co_host: false,
        }
    }

    /// Set explicit IDs (for reproducible tests).
    #[must_use]
    pub fn with_ids(mut self, participant_id: &str, user_id: &str) -> Self {
        self.participant_id = participant_id.to_string();
        self.user_id = user_id.to_string();
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn host(mut self) -> Self {
        self.is_host = true;
        self
    }

    #[must_use]
    pub fn co_host(mut self) -> Self {
        self.is_co_host = true;
        self
    }

    /// Participant block as reported on a join.
    #[must_use]
    pub fn details(&self) -> ParticipantDetails {
        ParticipantDetails {
            id: self.participant_id.clone(),
            user_id: Some(self.user_id.clone()),
            name: Some(self.name.clone()),
            email: self.email.clone(),
            is_host: Some(self.is_host),
            is_co_host: Some(self.is_co_host),
            ..Default::default()
        }
    }

    /// Participant block carrying only the id.
    #[must_use]
    pub fn id_only(&self) -> ParticipantDetails {
        ParticipantDetails {
            id: self.participant_id.clone(),
            ..Default::default()
        }
    }
}

/// Builder for provider envelopes.
#[derive(Debug, Clone)]
pub struct TestEnvelope {
    envelope: EventEnvelope,
}

impl TestEnvelope {
    /// Envelope of `event_type` for `meeting_id`, with no event id, at
    /// `base_time()`.
    #[must_use]
    pub fn new(event_type: &str, meeting_id: &str) -> Self {
        Self {
            envelope: EventEnvelope {
                event_id: None,
                event_type: event_type.to_string(),
                event_timestamp: base_time(),
                meeting_id: meeting_id.to_string(),
                account_id: TEST_ACCOUNT_ID.to_string(),
                actor_id: String::new(),
                participant: None,
                payload: Map::new(),
                signature: None,
            },
        }
    }

    #[must_use]
    pub fn id(mut self, event_id: &str) -> Self {
        self.envelope.event_id = Some(event_id.to_string());
        self
    }

    /// Random provider id.
    #[must_use]
    pub fn random_id(self) -> Self {
        let id = format!("evt-{}", Uuid::new_v4());
        self.id(&id)
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.envelope.event_timestamp = timestamp;
        self
    }

    /// Timestamp `seconds` after `base_time()`.
    #[must_use]
    pub fn at_offset(self, seconds: i64) -> Self {
        self.at(at_offset(seconds))
    }

    #[must_use]
    pub fn account(mut self, account_id: &str) -> Self {
        self.envelope.account_id = account_id.to_string();
        self
    }

    #[must_use]
    pub fn actor(mut self, actor_id: &str) -> Self {
        self.envelope.actor_id = actor_id.to_string();
        self
    }

    #[must_use]
    pub fn participant(mut self, details: ParticipantDetails) -> Self {
        self.envelope.participant = Some(details);
        self
    }

    #[must_use]
    pub fn payload(mut self, key: &str, value: Value) -> Self {
        self.envelope.payload.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> EventEnvelope {
        self.envelope
    }
}

/// `meeting.started` with a topic.
#[must_use]
pub fn meeting_started(meeting_id: &str, topic: &str) -> TestEnvelope {
    TestEnvelope::new("meeting.started", meeting_id).payload("topic", Value::from(topic))
}

/// `meeting.ended`.
#[must_use]
pub fn meeting_ended(meeting_id: &str) -> TestEnvelope {
    TestEnvelope::new("meeting.ended", meeting_id)
}

/// `meeting.participant_joined` with the full participant block.
#[must_use]
pub fn participant_joined(meeting_id: &str, participant: &TestParticipant) -> TestEnvelope {
    TestEnvelope::new("meeting.participant_joined", meeting_id).participant(participant.details())
}

/// `meeting.participant_left`.
#[must_use]
pub fn participant_left(meeting_id: &str, participant: &TestParticipant) -> TestEnvelope {
    TestEnvelope::new("meeting.participant_left", meeting_id).participant(participant.id_only())
}

/// Provider status event (e.g. `meeting.participant_audio_muted`) with only
/// the participant id reported.
#[must_use]
pub fn participant_status(
    event_type: &str,
    meeting_id: &str,
    participant: &TestParticipant,
) -> TestEnvelope {
    TestEnvelope::new(event_type, meeting_id).participant(participant.id_only())
}
