//! Internal HTTP surface.
//!
//! - `POST /v1/events` - Event Source ingestion (202 accepted, 503 retry)
//! - `GET /v1/statistics` - operational statistics
//! - `GET /v1/meetings/:meeting_id` - live meeting state
//! - `GET /v1/meetings/:meeting_id/participants/:participant_id` - live snapshot
//! - `GET /health`, `GET /ready` - liveness and readiness
//! - `GET /metrics` - Prometheus exposition

use crate::engine::EventEngine;
use crate::errors::MeError;
use crate::events::EventEnvelope;
use crate::ingest::IngestOutcome;
use crate::observability::health_router;
use crate::pipeline::EngineStatistics;
use crate::state::{MeetingState, ParticipantSnapshot};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /v1/events` responses.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

fn ingest_response(outcome: IngestOutcome) -> (StatusCode, IngestResponse) {
    match outcome {
        IngestOutcome::Accepted { event_id } => (
            StatusCode::ACCEPTED,
            IngestResponse {
                accepted: true,
                event_id,
                duplicate: Some(false),
                reason: None,
            },
        ),
        IngestOutcome::Duplicate { event_id } => (
            StatusCode::ACCEPTED,
            IngestResponse {
                accepted: true,
                event_id,
                duplicate: Some(true),
                reason: None,
            },
        ),
        IngestOutcome::Rejected { event_id, reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            IngestResponse {
                accepted: false,
                event_id,
                duplicate: None,
                reason: Some(reason.as_str()),
            },
        ),
    }
}

/// Ingestion and query routes.
pub fn api_router(engine: Arc<EventEngine>) -> Router {
    Router::new()
        .route("/v1/events", post(ingest_event))
        .route("/v1/statistics", get(get_statistics))
        .route("/v1/meetings/:meeting_id", get(get_meeting))
        .route(
            "/v1/meetings/:meeting_id/participants/:participant_id",
            get(get_participant),
        )
        .with_state(engine)
}

/// Full application: API routes, health endpoints and `/metrics`, with request
/// tracing and a request timeout.
pub fn build_routes(engine: Arc<EventEngine>, prometheus: PrometheusHandle) -> Router {
    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus.clone();
            async move { handle.render() }
        }),
    );

    api_router(Arc::clone(&engine))
        .merge(health_router(Arc::clone(engine.health())))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

async fn ingest_event(
    State(engine): State<Arc<EventEngine>>,
    Json(envelope): Json<EventEnvelope>,
) -> (StatusCode, Json<IngestResponse>) {
    let (status, body) = ingest_response(engine.submit(envelope).await);
    (status, Json(body))
}

async fn get_statistics(State(engine): State<Arc<EventEngine>>) -> Json<EngineStatistics> {
    Json(engine.get_statistics())
}

async fn get_meeting(
    State(engine): State<Arc<EventEngine>>,
    Path(meeting_id): Path<String>,
) -> Result<Json<MeetingState>, MeError> {
    engine
        .get_meeting_state(&meeting_id)
        .await?
        .map(Json)
        .ok_or(MeError::MeetingNotFound(meeting_id))
}

async fn get_participant(
    State(engine): State<Arc<EventEngine>>,
    Path((meeting_id, participant_id)): Path<(String, String)>,
) -> Result<Json<ParticipantSnapshot>, MeError> {
    engine
        .get_participant_state(&meeting_id, &participant_id)
        .await?
        .map(Json)
        .ok_or(MeError::ParticipantNotFound(participant_id))
}
