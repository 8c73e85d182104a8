//! Status, Health Check and Metrics Endpoint
//!
//! Read-only HTTP surface over the aggregated transit state and the
//! consumers feeding it.
//!
//! # Endpoints
//!
//! - `GET /snapshot` - Aggregated per-line state and weather as JSON
//! - `GET /health` - Returns JSON health status with per-consumer counters
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (every consumer running)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    ConsumerState, ConsumerStatus, ConsumerStatusSnapshot, SnapshotReader,
};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-consumer state and counters.
    pub consumers: Vec<ConsumerStatusSnapshot>,
    /// Stations currently tracked across all lines.
    pub stations: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every consumer running.
    Healthy,
    /// Some consumers closed or not started.
    Degraded,
    /// No consumer running.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    snapshot: SnapshotReader,
    consumers: Vec<Arc<ConsumerStatus>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        snapshot: SnapshotReader,
        consumers: Vec<Arc<ConsumerStatus>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            snapshot,
            consumers,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Status HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding a socket.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/snapshot", get(snapshot_handler))
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn snapshot_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.snapshot.snapshot())
}

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = !state.consumers.is_empty()
        && state
            .consumers
            .iter()
            .all(|c| is_running(c.state()));

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

const fn is_running(state: ConsumerState) -> bool {
    matches!(
        state,
        ConsumerState::Subscribed | ConsumerState::Polling | ConsumerState::Idle
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let consumers: Vec<ConsumerStatusSnapshot> =
        state.consumers.iter().map(|c| c.snapshot()).collect();

    HealthResponse {
        status: determine_health_status(&consumers),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stations: state.snapshot.snapshot().station_count(),
        consumers,
    }
}

fn determine_health_status(consumers: &[ConsumerStatusSnapshot]) -> HealthStatus {
    let running = consumers.iter().filter(|c| is_running(c.state)).count();

    match running {
        0 => HealthStatus::Unhealthy,
        n if n == consumers.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
