//! Meeting and participant state owned by the reconciler.

use crate::events::{ParticipantDetails, StatusChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Meeting lifecycle. Ordered: a meeting only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Known only through participant activity; no start seen yet.
    Unstarted,
    Started,
    Ended,
}

impl MeetingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Unstarted => "unstarted",
            MeetingStatus::Started => "started",
            MeetingStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    #[default]
    None,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    InMeeting,
    Away,
}

/// One participant's view within a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub participant_id: String,
    pub user_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub connection_status: ConnectionStatus,
    pub is_host: bool,
    pub is_co_host: bool,
    pub audio_muted: bool,
    pub video_on: bool,
    pub screen_share_on: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    /// `left_at - joined_at`, set together with `left_at`.
    pub duration_seconds: Option<i64>,
}

impl ParticipantSnapshot {
    /// New in-meeting snapshot from a join.
    #[must_use]
    pub fn joined(
        details: &ParticipantDetails,
        account_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id: details.id.clone(),
            user_id: details.user_id.clone(),
            account_id: account_id.to_string(),
            name: details.name.clone(),
            email: details.email.clone(),
            connection_status: ConnectionStatus::InMeeting,
            is_host: details.is_host.unwrap_or(false),
            is_co_host: details.is_co_host.unwrap_or(false),
            audio_muted: details.audio_muted.unwrap_or(false),
            video_on: details.video_on.unwrap_or(false),
            screen_share_on: details.screen_share_on.unwrap_or(false),
            joined_at,
            left_at: None,
            duration_seconds: None,
        }
    }

    /// Re-enter the meeting, keeping identity fields the join did not report.
    pub fn rejoin(&mut self, details: &ParticipantDetails, joined_at: DateTime<Utc>) {
        if details.user_id.is_some() {
            self.user_id.clone_from(&details.user_id);
        }
        if details.name.is_some() {
            self.name.clone_from(&details.name);
        }
        if details.email.is_some() {
            self.email.clone_from(&details.email);
        }
        self.apply_status(&StatusChange::from_details(details));
        self.connection_status = ConnectionStatus::InMeeting;
        self.joined_at = joined_at;
        self.left_at = None;
        self.duration_seconds = None;
    }

    /// Mark as away at `left_at` and derive the duration.
    ///
    /// `left_at` is clamped to `joined_at` so the duration is never negative.
    pub fn depart(&mut self, left_at: DateTime<Utc>) {
        let left_at = left_at.max(self.joined_at);
        self.connection_status = ConnectionStatus::Away;
        self.left_at = Some(left_at);
        self.duration_seconds = Some(left_at.signed_duration_since(self.joined_at).num_seconds());
    }

    /// Merge reported flags. Returns whether anything changed.
    pub fn apply_status(&mut self, change: &StatusChange) -> bool {
        let before = self.clone();
        if let Some(v) = change.audio_muted {
            self.audio_muted = v;
        }
        if let Some(v) = change.video_on {
            self.video_on = v;
        }
        if let Some(v) = change.screen_share_on {
            self.screen_share_on = v;
        }
        if let Some(v) = change.is_host {
            self.is_host = v;
        }
        if let Some(v) = change.is_co_host {
            self.is_co_host = v;
        }
        *self != before
    }

    #[must_use]
    pub fn is_in_meeting(&self) -> bool {
        self.connection_status == ConnectionStatus::InMeeting
    }
}

/// Authoritative in-memory state of one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingState {
    pub meeting_id: String,
    pub account_id: String,
    pub topic: Option<String>,
    pub host_id: Option<String>,
    pub status: MeetingStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub recording_status: RecordingStatus,
    /// Keyed by participant id. Ordered so serialized state is stable.
    pub participants: BTreeMap<String, ParticipantSnapshot>,
    pub settings: Map<String, Value>,
    pub last_updated: DateTime<Utc>,
}

impl MeetingState {
    /// Meeting seen for the first time in `status`.
    #[must_use]
    pub fn new(
        meeting_id: impl Into<String>,
        account_id: impl Into<String>,
        status: MeetingStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            account_id: account_id.into(),
            topic: None,
            host_id: None,
            status,
            start_time: None,
            end_time: None,
            recording_status: RecordingStatus::None,
            participants: BTreeMap::new(),
            settings: Map::new(),
            last_updated: now,
        }
    }

    /// Participants currently in the meeting.
    pub fn active_participants(&self) -> impl Iterator<Item = &ParticipantSnapshot> {
        self.participants.values().filter(|p| p.is_in_meeting())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}
