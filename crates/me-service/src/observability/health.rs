//! Liveness and readiness endpoints.
//!
//! - `GET /health` - process is running
//! - `GET /ready` - the engine is consuming and accepting events
//!
//! The engine moves through `starting -> ready -> draining`. Readiness is
//! only reported in `ready`, so load balancers stop routing new envelopes as
//! soon as the queue starts draining.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Engine lifecycle phase as reported by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Starting,
    Ready,
    Draining,
}

impl EnginePhase {
    const fn to_u8(self) -> u8 {
        match self {
            EnginePhase::Starting => 0,
            EnginePhase::Ready => 1,
            EnginePhase::Draining => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => EnginePhase::Starting,
            1 => EnginePhase::Ready,
            _ => EnginePhase::Draining,
        }
    }
}

/// Readiness state shared between the engine and the HTTP surface.
#[derive(Debug)]
pub struct HealthState {
    phase: AtomicU8,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(EnginePhase::Starting.to_u8()),
        }
    }

    /// Mark the engine as accepting events.
    pub fn set_ready(&self) {
        self.phase.store(EnginePhase::Ready.to_u8(), Ordering::SeqCst);
    }

    /// Mark the engine as draining. Never returns to `Ready`.
    pub fn set_draining(&self) {
        self.phase
            .store(EnginePhase::Draining.to_u8(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        EnginePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == EnginePhase::Ready
    }
}

#[derive(Debug, Serialize)]
struct PhaseBody {
    status: EnginePhase,
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<PhaseBody>) {
    let phase = state.phase();
    let status = if phase == EnginePhase::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(PhaseBody { status: phase }))
}
