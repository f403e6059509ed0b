//! Downstream WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::handler::{WsState, ws_handler};

/// Build the client-facing router.
pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route("/ws/market/{symbol}", get(ws_handler))
        .with_state(state)
}

/// HTTP server hosting the WebSocket route.
pub struct RelayServer {
    addr: SocketAddr,
    state: Arc<WsState>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub const fn new(addr: SocketAddr, state: Arc<WsState>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "Relay server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
