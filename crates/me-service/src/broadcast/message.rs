//! Broadcast scopes and the message delivered to subscribers.

use crate::events::InternalEvent;
use crate::state::TransitionContext;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Addressable audience for a broadcast: `meeting:{id}` or `account:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum BroadcastScope {
    Meeting(String),
    Account(String),
}

impl BroadcastScope {
    #[must_use]
    pub fn meeting(meeting_id: impl Into<String>) -> Self {
        BroadcastScope::Meeting(meeting_id.into())
    }

    #[must_use]
    pub fn account(account_id: impl Into<String>) -> Self {
        BroadcastScope::Account(account_id.into())
    }
}

impl fmt::Display for BroadcastScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastScope::Meeting(id) => write!(f, "meeting:{id}"),
            BroadcastScope::Account(id) => write!(f, "account:{id}"),
        }
    }
}

impl From<BroadcastScope> for String {
    fn from(scope: BroadcastScope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for BroadcastScope {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.split_once(':') {
            Some(("meeting", id)) if !id.is_empty() => Ok(BroadcastScope::meeting(id)),
            Some(("account", id)) if !id.is_empty() => Ok(BroadcastScope::account(id)),
            _ => Err(format!("invalid broadcast scope: {raw}")),
        }
    }
}

/// What subscribers receive: the internal event plus identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub event_id: String,
    /// Internal taxonomy name, e.g. `PARTICIPANT_JOINED`.
    pub event_type: String,
    pub meeting_id: String,
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub scope: String,
    /// Serialized internal event.
    pub data: Value,
    /// ISO-8601 (RFC 3339, millisecond precision, `Z` suffix).
    pub timestamp: String,
}

impl BroadcastMessage {
    /// Build the message for `event`, addressed to `scope`.
    #[must_use]
    pub fn new(
        context: &TransitionContext,
        event: &InternalEvent,
        scope: &BroadcastScope,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: context.event_id.clone(),
            event_type: event.event_type().as_str().to_string(),
            meeting_id: context.meeting_id.clone(),
            account_id: context.account_id.clone(),
            participant_id: event.participant_id().map(str::to_string),
            scope: scope.to_string(),
            data: serde_json::to_value(event).unwrap_or(Value::Null),
            timestamp: sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::ParticipantDetails;
    use chrono::TimeZone;

    #[test]
    fn test_scope_string_form() {
        assert_eq!(BroadcastScope::meeting("m-1").to_string(), "meeting:m-1");
        assert_eq!(BroadcastScope::account("a-1").to_string(), "account:a-1");
        assert_eq!(
            BroadcastScope::try_from("meeting:m-1".to_string()).unwrap(),
            BroadcastScope::meeting("m-1")
        );
        assert!(BroadcastScope::try_from("room:1".to_string()).is_err());
        assert!(BroadcastScope::try_from("meeting:".to_string()).is_err());
    }

    #[test]
    fn test_message_carries_identifiers_and_iso_timestamp() {
        let context = TransitionContext {
            event_id: "E1".to_string(),
            meeting_id: "m-1".to_string(),
            account_id: "acct-1".to_string(),
            event_timestamp: Utc::now(),
        };
        let event = InternalEvent::ParticipantJoined {
            participant: ParticipantDetails {
                id: "p-1".to_string(),
                ..Default::default()
            },
        };
        let sent_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

        let message =
            BroadcastMessage::new(&context, &event, &BroadcastScope::meeting("m-1"), sent_at);

        assert_eq!(message.event_type, "PARTICIPANT_JOINED");
        assert_eq!(message.participant_id.as_deref(), Some("p-1"));
        assert_eq!(message.scope, "meeting:m-1");
        assert_eq!(message.timestamp, "2026-03-01T09:00:00.000Z");
        assert_eq!(message.data["type"], "PARTICIPANT_JOINED");
    }
}
