//! Meeting Events Service
//!
//! Real-time meeting lifecycle event processing engine.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect the durable store (Redis when `REDIS_URL` is set)
//! 5. Start the event engine (pipeline, reconciler, background tasks)
//! 6. Start the HTTP server (ingestion, queries, health, metrics)
//! 7. Wait for shutdown signal, then drain and stop

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use me_service::config::Config;
use me_service::engine::{build_store, EventEngine};
use me_service::http::build_routes;
use me_service::observability::metrics::init_metrics_recorder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config first: it decides the log format
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting Meeting Events service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        http_bind_address = %config.http_bind_address,
        queue_capacity = config.queue_capacity,
        dedup_window_secs = config.dedup_window.as_secs(),
        durable_store = if config.redis_url.is_some() { "redis" } else { "memory" },
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let store = build_store(&config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize durable store");
        e
    })?;

    let engine = Arc::new(EventEngine::start_with_local_hub(&config, store));

    let http_addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %http_addr, "Failed to bind HTTP server");
            format!("Failed to bind HTTP server to {http_addr}: {e}")
        })?;

    let app = build_routes(Arc::clone(&engine), prometheus_handle);
    let server_token = CancellationToken::new();
    let server_shutdown = server_token.clone();
    let server = tokio::spawn(async move {
        info!(addr = %http_addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("Meeting Events service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Engine first: readiness goes false and ingestion answers 503 while
    // the queue drains, then the listener stops
    if let Some(report) = engine.shutdown().await {
        info!(
            handled = report.pipeline.handled,
            drained = report.pipeline.drained,
            unprocessed = report.pipeline.unprocessed,
            "Event engine drained"
        );
    }

    server_token.cancel();
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server task failed");
    }

    info!("Meeting Events service shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber.
fn init_tracing(log_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "me_service=debug,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log_json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
