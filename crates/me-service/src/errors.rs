//! Meeting Events error types.
//!
//! Failures inside the engine never propagate to the Event Source caller
//! (the only caller-visible failure is the backpressure non-accept). These
//! variants surface through logs, statistics and `me_errors_total`.
//!
//! On the HTTP surface errors map to status codes via `IntoResponse`; store
//! and internal details are logged server-side, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Meeting Events service error type.
#[derive(Debug, Error)]
pub enum MeError {
    /// Durable store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Ingestion queue is at capacity (caller must retry).
    #[error("Ingestion queue full")]
    QueueFull,

    /// Engine is shutting down and no longer accepts events.
    #[error("Engine is draining")]
    Draining,

    /// Provider event type has no internal mapping.
    #[error("Unmapped event type: {0}")]
    UnmappedEventType(String),

    /// Event is mapped but its payload is missing required data.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Meeting not found in live state.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// Participant not found in live state.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Subscriber channel delivery failed.
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// JSON encode/decode failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context (closed channels, dropped actors).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeError {
    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content, so label
    /// cardinality stays fixed.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            MeError::Store(_) => "store",
            MeError::QueueFull => "queue_full",
            MeError::Draining => "draining",
            MeError::UnmappedEventType(_) => "unmapped_event_type",
            MeError::InvalidEvent(_) => "invalid_event",
            MeError::MeetingNotFound(_) => "meeting_not_found",
            MeError::ParticipantNotFound(_) => "participant_not_found",
            MeError::Broadcast(_) => "broadcast",
            MeError::Serialization(_) => "serialization",
            MeError::Config(_) => "config",
            MeError::Internal(_) => "internal",
        }
    }

    /// Whether a retry of the same operation may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MeError::Store(_) | MeError::QueueFull | MeError::Broadcast(_)
        )
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for MeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            MeError::MeetingNotFound(id) => (StatusCode::NOT_FOUND, format!("meeting {id}")),
            MeError::ParticipantNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("participant {id}"))
            }
            MeError::InvalidEvent(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            MeError::QueueFull | MeError::Draining => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            other => {
                tracing::error!(target: "me.http", error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_type_label().to_ascii_uppercase(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for MeError {
    fn from(err: serde_json::Error) -> Self {
        MeError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for MeError {
    fn from(err: redis::RedisError) -> Self {
        MeError::Store(err.to_string())
    }
}
