//! Inbound envelope and the canonical event built from it.
//!
//! The Event Source hands over an already-normalized envelope; the gateway
//! stamps a receipt time and, when the provider omitted one, a deterministic
//! `event_id`. A `CanonicalEvent` is immutable once it has been enqueued.

use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix for ids synthesized by the gateway.
pub const SYNTHESIZED_ID_PREFIX: &str = "syn-";

/// Hex characters of the SHA-256 digest kept in a synthesized id.
const SYNTHESIZED_ID_HEX_LEN: usize = 32;

/// Participant block carried on participant-scoped envelopes.
///
/// Every media/role flag is optional: absent means "not reported", which
/// status merges must not treat as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDetails {
    /// Participant ID (unique within a meeting).
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_host: Option<bool>,
    #[serde(default)]
    pub is_co_host: Option<bool>,
    #[serde(default)]
    pub audio_muted: Option<bool>,
    #[serde(default)]
    pub video_on: Option<bool>,
    #[serde(default)]
    pub screen_share_on: Option<bool>,
}

/// Normalized envelope delivered by the Event Source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Provider event id. Synthesized by the gateway when absent or empty.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Provider vocabulary, e.g. `meeting.participant_joined`.
    pub event_type: String,
    /// When the provider says the event happened.
    pub event_timestamp: DateTime<Utc>,
    pub meeting_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub participant: Option<ParticipantDetails>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl EventEnvelope {
    /// The provider id if present and non-blank, otherwise a synthesized one.
    #[must_use]
    pub fn resolve_event_id(&self) -> String {
        match self.event_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => synthesize_event_id(self),
        }
    }
}

/// Deterministic id for an envelope without a provider id.
///
/// Identical redeliveries hash to the same id and are therefore caught by
/// the dedup window.
#[must_use]
pub fn synthesize_event_id(envelope: &EventEnvelope) -> String {
    let participant_id = envelope
        .participant
        .as_ref()
        .map(|p| p.id.as_str())
        .unwrap_or_default();
    let material = format!(
        "{}|{}|{}|{}|{}",
        envelope.event_type,
        envelope.meeting_id,
        participant_id,
        envelope.actor_id,
        envelope.event_timestamp.timestamp_millis()
    );
    let hash = hex::encode(digest(&SHA256, material.as_bytes()));
    let short = hash.get(..SYNTHESIZED_ID_HEX_LEN).unwrap_or(hash.as_str());
    format!("{SYNTHESIZED_ID_PREFIX}{short}")
}

/// Normalized, deduplicated representation of one provider notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_id: String,
    pub event_type: String,
    pub event_timestamp: DateTime<Utc>,
    /// When the gateway accepted the envelope. Retention is keyed on this.
    pub receipt_timestamp: DateTime<Utc>,
    pub meeting_id: String,
    pub account_id: String,
    pub actor_id: String,
    #[serde(default)]
    pub participant: Option<ParticipantDetails>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl CanonicalEvent {
    /// Build the canonical form of an envelope received at `received_at`.
    #[must_use]
    pub fn from_envelope(envelope: EventEnvelope, received_at: DateTime<Utc>) -> Self {
        let event_id = envelope.resolve_event_id();
        Self {
            event_id,
            event_type: envelope.event_type,
            event_timestamp: envelope.event_timestamp,
            receipt_timestamp: received_at,
            meeting_id: envelope.meeting_id,
            account_id: envelope.account_id,
            actor_id: envelope.actor_id,
            participant: envelope.participant,
            payload: envelope.payload,
            signature: envelope.signature,
        }
    }

    /// Participant id from the participant block, falling back to
    /// `payload.participant_id`.
    #[must_use]
    pub fn participant_id(&self) -> Option<&str> {
        self.participant
            .as_ref()
            .map(|p| p.id.as_str())
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.payload
                    .get("participant_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
            })
    }

    /// String field from the opaque payload.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
