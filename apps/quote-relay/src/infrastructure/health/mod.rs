//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, Prometheus
//! metrics, and manual feed recovery.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness observed (simple OK)
//! - `GET /readyz` - Readiness observed (ready while the feed is listening)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /feed/restart` - Restart the upstream feed with a fresh retry budget

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::Relay;
use crate::domain::feed::{FeedPhase, FeedSnapshot};
use crate::domain::subscription::RegistryStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedSnapshot,
    /// Downstream subscription statistics.
    pub subscriptions: RegistryStats,
    /// Whether the feed gave up and needs a restart.
    pub degraded: bool,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed is streaming.
    Healthy,
    /// Feed is recovering.
    Degraded,
    /// Feed is down.
    Unhealthy,
}

/// Response to a restart request.
#[derive(Debug, Clone, Serialize)]
pub struct RestartResponse {
    /// Phase right after the restart was issued.
    pub phase: FeedPhase,
    /// Session generation at the time of the response.
    pub generation: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    relay: Arc<Relay>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, relay: Arc<Relay>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            relay,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/feed/restart", post(restart_handler))
        .with_state(state)
}

/// Health check HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

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
    if state.relay.feed_state().phase() == FeedPhase::Listening {
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

async fn restart_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.relay.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING DOWN").into_response();
    }

    tracing::info!("Feed restart requested over HTTP");
    state.relay.restart_feed().await;

    let feed = state.relay.feed_state();
    let response = RestartResponse {
        phase: feed.phase(),
        generation: feed.generation(),
    };
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stats = state.relay.stats();

    HealthResponse {
        status: determine_health_status(stats.feed.phase),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: stats.feed,
        subscriptions: stats.subscriptions,
        degraded: stats.degraded,
    }
}

const fn determine_health_status(phase: FeedPhase) -> HealthStatus {
    match phase {
        FeedPhase::Listening => HealthStatus::Healthy,
        FeedPhase::Connecting | FeedPhase::Backoff => HealthStatus::Degraded,
        FeedPhase::Failed | FeedPhase::Stopped => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
