//! Quote Relay Binary
//!
//! Starts the real-time quote relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_HOST`: Bind address (default: 127.0.0.1)
//! - `MARKET_PORT`: WebSocket relay port (default: 5000)
//! - `MARKET_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `MARKET_FEED_URL`: Upstream streamer URL (default: Yahoo v2 streamer)
//! - `MARKET_HEARTBEAT_INTERVAL_SECS` / `MARKET_HEARTBEAT_TIMEOUT_SECS` (default: 20 / 20)
//! - `MARKET_RECONNECT_DELAY_INITIAL_MS` (default: 2000)
//! - `MARKET_RECONNECT_DELAY_MAX_SECS` (default: 60)
//! - `MARKET_RECONNECT_DELAY_MULTIPLIER` (default: 2.0)
//! - `MARKET_RECONNECT_JITTER` (default: 0.0)
//! - `MARKET_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 5)
//! - `MARKET_CLIENT_QUEUE_CAPACITY` (default: 256)
//! - `MARKET_FEED_EVENT_CAPACITY` (default: 1024)
//! - `MARKET_FEED_DELIVERY_TIMEOUT_MS` (default: 100)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: quote_relay=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_relay::infrastructure::health::{HealthServer, HealthServerState};
use quote_relay::infrastructure::telemetry;
use quote_relay::infrastructure::websocket::{RelayServer, WsState};
use quote_relay::{
    DemandSource, FeedClient, FeedEvent, FeedState, Relay, RelayConfig, SubscriptionRegistry,
    YahooConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting quote relay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core state
    let registry = Arc::new(SubscriptionRegistry::new());
    let feed_state = Arc::new(FeedState::new());
    let (events_tx, events_rx) = mpsc::channel::<FeedEvent>(config.feed.event_capacity);

    // Upstream feed
    let demand: Arc<dyn DemandSource> = registry.clone();
    let feed = Arc::new(FeedClient::new(
        YahooConnector::new(config.yahoo_config()),
        demand,
        Arc::clone(&feed_state),
        events_tx,
        config.feed_client_config(),
    ));

    // Relay core
    let relay = Arc::new(Relay::new(
        Arc::clone(&registry),
        feed,
        Arc::clone(&feed_state),
    ));
    relay.spawn_dispatch(events_rx);
    relay.start().await;

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&relay),
    ));
    let health_server = HealthServer::new(
        config.server.health_addr(),
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Client-facing WebSocket server
    let ws_state = Arc::new(WsState::new(
        Arc::clone(&relay),
        config.client.queue_capacity,
    ));
    let relay_server = RelayServer::new(
        config.server.relay_addr(),
        ws_state,
        shutdown_token.clone(),
    );
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay_server.run().await {
            tracing::error!(error = %e, "Relay server error");
        }
    });

    tracing::info!("Quote relay ready");

    await_shutdown(shutdown_token).await;

    // Ingestion first, then downstream connections
    relay.shutdown().await;
    join_with_timeout("relay server", relay_task).await;
    join_with_timeout("health server", health_task).await;

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        relay_addr = %config.server.relay_addr(),
        health_addr = %config.server.health_addr(),
        feed_url = %config.feed.url,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        client_queue_capacity = config.client.queue_capacity,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a server task, aborting it after the shutdown timeout.
async fn join_with_timeout(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(server = name, error = %e, "Server task ended abnormally"),
        Err(_) => {
            tracing::warn!(server = name, "Server did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
