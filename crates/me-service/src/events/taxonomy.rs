//! Provider vocabulary → internal event taxonomy.
//!
//! [`map_event_type`] is a pure, total function: every provider string maps
//! to exactly one internal variant or to [`EventMapping::Unmapped`]. Provider
//! types that imply a media flag (e.g. `meeting.participant_audio_muted`)
//! carry that flag as an implied [`StatusChange`].

use crate::errors::MeError;
use crate::events::envelope::{CanonicalEvent, ParticipantDetails};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Internal event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InternalEventType {
    MeetingStarted,
    MeetingEnded,
    ParticipantJoined,
    ParticipantLeft,
    ParticipantStatusChanged,
    RecordingStarted,
    RecordingStopped,
}

impl InternalEventType {
    /// Stable name used in broadcasts, logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            InternalEventType::MeetingStarted => "MEETING_STARTED",
            InternalEventType::MeetingEnded => "MEETING_ENDED",
            InternalEventType::ParticipantJoined => "PARTICIPANT_JOINED",
            InternalEventType::ParticipantLeft => "PARTICIPANT_LEFT",
            InternalEventType::ParticipantStatusChanged => "PARTICIPANT_STATUS_CHANGED",
            InternalEventType::RecordingStarted => "RECORDING_STARTED",
            InternalEventType::RecordingStopped => "RECORDING_STOPPED",
        }
    }
}

/// Partial update of a participant's media and role flags.
///
/// `None` means "not reported"; merges never clear a field on `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_share_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_co_host: Option<bool>,
}

impl StatusChange {
    /// Fields reported on a participant block.
    #[must_use]
    pub fn from_details(details: &ParticipantDetails) -> Self {
        Self {
            audio_muted: details.audio_muted,
            video_on: details.video_on,
            screen_share_on: details.screen_share_on,
            is_host: details.is_host,
            is_co_host: details.is_co_host,
        }
    }

    /// Fill fields missing from `self` with values from `fallback`.
    #[must_use]
    pub fn or(self, fallback: StatusChange) -> Self {
        Self {
            audio_muted: self.audio_muted.or(fallback.audio_muted),
            video_on: self.video_on.or(fallback.video_on),
            screen_share_on: self.screen_share_on.or(fallback.screen_share_on),
            is_host: self.is_host.or(fallback.is_host),
            is_co_host: self.is_co_host.or(fallback.is_co_host),
        }
    }

    /// True when no field is reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == StatusChange::default()
    }
}

/// Result of looking up a provider event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMapping {
    Mapped {
        kind: InternalEventType,
        /// Flags implied by the provider type itself.
        implied: StatusChange,
    },
    Unmapped,
}

impl EventMapping {
    const fn plain(kind: InternalEventType) -> Self {
        EventMapping::Mapped {
            kind,
            implied: StatusChange {
                audio_muted: None,
                video_on: None,
                screen_share_on: None,
                is_host: None,
                is_co_host: None,
            },
        }
    }

    const fn status(implied: StatusChange) -> Self {
        EventMapping::Mapped {
            kind: InternalEventType::ParticipantStatusChanged,
            implied,
        }
    }
}

const NO_CHANGE: StatusChange = StatusChange {
    audio_muted: None,
    video_on: None,
    screen_share_on: None,
    is_host: None,
    is_co_host: None,
};

/// Map a provider event type to the internal taxonomy.
///
/// Matching ignores ASCII case and surrounding whitespace.
#[must_use]
pub fn map_event_type(provider_type: &str) -> EventMapping {
    let normalized = provider_type.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "meeting.started" => EventMapping::plain(InternalEventType::MeetingStarted),
        "meeting.ended" => EventMapping::plain(InternalEventType::MeetingEnded),
        "meeting.participant_joined" => EventMapping::plain(InternalEventType::ParticipantJoined),
        "meeting.participant_left" => EventMapping::plain(InternalEventType::ParticipantLeft),
        "meeting.participant_updated" | "meeting.participant_status_changed" => {
            EventMapping::status(NO_CHANGE)
        }
        "meeting.participant_audio_muted" => EventMapping::status(StatusChange {
            audio_muted: Some(true),
            ..NO_CHANGE
        }),
        "meeting.participant_audio_unmuted" => EventMapping::status(StatusChange {
            audio_muted: Some(false),
            ..NO_CHANGE
        }),
        "meeting.participant_video_on" => EventMapping::status(StatusChange {
            video_on: Some(true),
            ..NO_CHANGE
        }),
        "meeting.participant_video_off" => EventMapping::status(StatusChange {
            video_on: Some(false),
            ..NO_CHANGE
        }),
        "meeting.sharing_started" => EventMapping::status(StatusChange {
            screen_share_on: Some(true),
            ..NO_CHANGE
        }),
        "meeting.sharing_ended" => EventMapping::status(StatusChange {
            screen_share_on: Some(false),
            ..NO_CHANGE
        }),
        "meeting.participant_role_changed" => EventMapping::status(NO_CHANGE),
        "recording.started" | "recording.resumed" | "meeting.recording_started" => {
            EventMapping::plain(InternalEventType::RecordingStarted)
        }
        "recording.stopped" | "recording.paused" | "meeting.recording_stopped" => {
            EventMapping::plain(InternalEventType::RecordingStopped)
        }
        _ => EventMapping::Unmapped,
    }
}

/// Internal event with the data each transition needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InternalEvent {
    MeetingStarted {
        topic: Option<String>,
        host_id: Option<String>,
        settings: Map<String, Value>,
    },
    MeetingEnded,
    ParticipantJoined {
        participant: ParticipantDetails,
    },
    ParticipantLeft {
        participant_id: String,
    },
    ParticipantStatusChanged {
        participant_id: String,
        change: StatusChange,
    },
    RecordingStarted,
    RecordingStopped,
}

impl InternalEvent {
    /// Build the internal event for a mapped canonical event.
    ///
    /// # Errors
    ///
    /// Returns `MeError::InvalidEvent` when a participant-scoped event does
    /// not identify its participant.
    pub fn from_canonical(
        event: &CanonicalEvent,
        kind: InternalEventType,
        implied: StatusChange,
    ) -> Result<Self, MeError> {
        let require_participant_id = || {
            event.participant_id().map(str::to_string).ok_or_else(|| {
                MeError::InvalidEvent(format!("{} without participant id", kind.as_str()))
            })
        };

        let internal = match kind {
            InternalEventType::MeetingStarted => InternalEvent::MeetingStarted {
                topic: event.payload_str("topic").map(str::to_string),
                host_id: event
                    .payload_str("host_id")
                    .map(str::to_string)
                    .or_else(|| Some(event.actor_id.clone()).filter(|a| !a.is_empty())),
                settings: event
                    .payload
                    .get("settings")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            InternalEventType::MeetingEnded => InternalEvent::MeetingEnded,
            InternalEventType::ParticipantJoined => {
                let participant_id = require_participant_id()?;
                let mut participant = event.participant.clone().unwrap_or_default();
                participant.id = participant_id;
                InternalEvent::ParticipantJoined { participant }
            }
            InternalEventType::ParticipantLeft => InternalEvent::ParticipantLeft {
                participant_id: require_participant_id()?,
            },
            InternalEventType::ParticipantStatusChanged => {
                let reported = event
                    .participant
                    .as_ref()
                    .map(StatusChange::from_details)
                    .unwrap_or_default();
                InternalEvent::ParticipantStatusChanged {
                    participant_id: require_participant_id()?,
                    change: reported.or(implied),
                }
            }
            InternalEventType::RecordingStarted => InternalEvent::RecordingStarted,
            InternalEventType::RecordingStopped => InternalEvent::RecordingStopped,
        };

        Ok(internal)
    }

    /// The taxonomy variant of this event.
    #[must_use]
    pub fn event_type(&self) -> InternalEventType {
        match self {
            InternalEvent::MeetingStarted { .. } => InternalEventType::MeetingStarted,
            InternalEvent::MeetingEnded => InternalEventType::MeetingEnded,
            InternalEvent::ParticipantJoined { .. } => InternalEventType::ParticipantJoined,
            InternalEvent::ParticipantLeft { .. } => InternalEventType::ParticipantLeft,
            InternalEvent::ParticipantStatusChanged { .. } => {
                InternalEventType::ParticipantStatusChanged
            }
            InternalEvent::RecordingStarted => InternalEventType::RecordingStarted,
            InternalEvent::RecordingStopped => InternalEventType::RecordingStopped,
        }
    }

    /// Participant this event is about, if any.
    #[must_use]
    pub fn participant_id(&self) -> Option<&str> {
        match self {
            InternalEvent::ParticipantJoined { participant } => Some(participant.id.as_str()),
            InternalEvent::ParticipantLeft { participant_id }
            | InternalEvent::ParticipantStatusChanged { participant_id, .. } => {
                Some(participant_id.as_str())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn canonical(event_type: &str, participant: Option<ParticipantDetails>) -> CanonicalEvent {
        CanonicalEvent {
            event_id: "evt-1".to_string(),
            event_type: event_type.to_string(),
            event_timestamp: Utc::now(),
            receipt_timestamp: Utc::now(),
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            actor_id: "host-user".to_string(),
            participant,
            payload: Map::new(),
            signature: None,
        }
    }

    #[test]
    fn test_lifecycle_types_map() {
        assert_eq!(
            map_event_type("meeting.started"),
            EventMapping::plain(InternalEventType::MeetingStarted)
        );
        assert_eq!(
            map_event_type("meeting.ended"),
            EventMapping::plain(InternalEventType::MeetingEnded)
        );
        assert_eq!(
            map_event_type("meeting.participant_joined"),
            EventMapping::plain(InternalEventType::ParticipantJoined)
        );
        assert_eq!(
            map_event_type("meeting.participant_left"),
            EventMapping::plain(InternalEventType::ParticipantLeft)
        );
        assert_eq!(
            map_event_type("recording.paused"),
            EventMapping::plain(InternalEventType::RecordingStopped)
        );
    }

    #[test]
    fn test_matching_ignores_case_and_whitespace() {
        assert_eq!(
            map_event_type("  Meeting.Started "),
            EventMapping::plain(InternalEventType::MeetingStarted)
        );
    }

    #[test]
    fn test_unknown_types_are_unmapped() {
        assert_eq!(
            map_event_type("meeting.unknown_future_event"),
            EventMapping::Unmapped
        );
        assert_eq!(map_event_type(""), EventMapping::Unmapped);
    }

    #[test]
    fn test_implied_status_flags() {
        let mapping = map_event_type("meeting.participant_audio_muted");
        assert!(
            matches!(
                &mapping,
                EventMapping::Mapped { kind: InternalEventType::ParticipantStatusChanged, implied }
                    if implied.audio_muted == Some(true) && implied.video_on.is_none()
            ),
            "unexpected mapping {mapping:?}"
        );
    }

    #[test]
    fn test_reported_flags_win_over_implied() {
        let details = ParticipantDetails {
            id: "p-1".to_string(),
            screen_share_on: Some(false),
            ..Default::default()
        };
        let event = canonical("meeting.sharing_started", Some(details));
        let implied = StatusChange {
            screen_share_on: Some(true),
            ..Default::default()
        };

        let internal = InternalEvent::from_canonical(
            &event,
            InternalEventType::ParticipantStatusChanged,
            implied,
        )
        .unwrap();

        assert!(
            matches!(
                &internal,
                InternalEvent::ParticipantStatusChanged { change, .. }
                    if change.screen_share_on == Some(false) && change.audio_muted.is_none()
            ),
            "unexpected event {internal:?}"
        );
    }

    #[test]
    fn test_participant_event_without_id_is_invalid() {
        let event = canonical("meeting.participant_left", None);

        let result = InternalEvent::from_canonical(
            &event,
            InternalEventType::ParticipantLeft,
            StatusChange::default(),
        );
        assert!(matches!(result, Err(MeError::InvalidEvent(_))));
    }

    #[test]
    fn test_meeting_started_reads_payload() {
        let mut event = canonical("meeting.started", None);
        event
            .payload
            .insert("topic".to_string(), Value::from("Standup"));
        event.payload.insert(
            "settings".to_string(),
            serde_json::json!({"waiting_room": true}),
        );

        let internal = InternalEvent::from_canonical(
            &event,
            InternalEventType::MeetingStarted,
            StatusChange::default(),
        )
        .unwrap();

        let InternalEvent::MeetingStarted {
            topic,
            host_id,
            settings,
        } = &internal
        else {
            unreachable!("unexpected event {internal:?}");
        };
        assert_eq!(topic.as_deref(), Some("Standup"));
        // Falls back to the actor when no host_id is in the payload
        assert_eq!(host_id.as_deref(), Some("host-user"));
        assert_eq!(settings.get("waiting_room"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_status_change_is_empty() {
        assert!(StatusChange::default().is_empty());
        assert!(!StatusChange {
            is_host: Some(true),
            ..Default::default()
        }
        .is_empty());
    }
}
