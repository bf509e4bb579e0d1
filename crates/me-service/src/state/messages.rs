//! Message types for the state reconciler actor.
//!
//! Requests go over `tokio::sync::mpsc`; replies come back on a
//! `tokio::sync::oneshot` carried in the message.

use super::model::{MeetingState, ParticipantSnapshot};
use crate::events::InternalEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Identifiers and time of the canonical event behind a transition.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub event_id: String,
    pub meeting_id: String,
    pub account_id: String,
    pub event_timestamp: DateTime<Utc>,
}

/// Why a transition left state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    AlreadyStarted,
    MeetingEnded,
    MeetingNotStarted,
    MeetingNotFound,
    ParticipantNotFound,
    AlreadyAway,
    /// Leave or join older than the participant's latest transition.
    StaleEvent,
    /// Nothing would change.
    NoChange,
}

impl IgnoreReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::AlreadyStarted => "already_started",
            IgnoreReason::MeetingEnded => "meeting_ended",
            IgnoreReason::MeetingNotStarted => "meeting_not_started",
            IgnoreReason::MeetingNotFound => "meeting_not_found",
            IgnoreReason::ParticipantNotFound => "participant_not_found",
            IgnoreReason::AlreadyAway => "already_away",
            IgnoreReason::StaleEvent => "stale_event",
            IgnoreReason::NoChange => "no_change",
        }
    }
}

/// Result of applying one internal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied,
    Ignored { reason: IgnoreReason },
}

impl TransitionOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Messages sent to the reconciler actor.
#[derive(Debug)]
pub enum ReconcilerMessage {
    /// Apply one internal event.
    Apply {
        context: TransitionContext,
        event: InternalEvent,
        respond_to: oneshot::Sender<TransitionOutcome>,
    },

    GetMeeting {
        meeting_id: String,
        respond_to: oneshot::Sender<Option<MeetingState>>,
    },

    GetParticipant {
        meeting_id: String,
        participant_id: String,
        respond_to: oneshot::Sender<Option<ParticipantSnapshot>>,
    },

    /// Clone of every meeting (for the synchronizer).
    SnapshotAll {
        respond_to: oneshot::Sender<Vec<MeetingState>>,
    },

    /// Drop ended meetings last updated before `older_than`.
    EvictEnded {
        older_than: DateTime<Utc>,
        respond_to: oneshot::Sender<usize>,
    },

    /// Forget evicted meetings that ended before `older_than`.
    PurgeTombstones {
        older_than: DateTime<Utc>,
        respond_to: oneshot::Sender<usize>,
    },
}
