#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Relay - Real-time Quote Multiplexer
//!
//! A WebSocket relay that keeps one upstream streamer subscription per
//! distinct symbol and fans quotes out to any number of downstream clients.
//! The upstream feed reconnects with exponential backoff and replays the
//! current demand set on every new session.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Symbols, relay messages, client protocol frames
//!   - `subscription`: Symbol to connection registry
//!   - `feed`: Upstream lifecycle state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed connector/session, upstream feed, demand source
//!   - `services`: Relay core and per-client sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Supervisor with reconnect policy
//!   - `yahoo`: Yahoo Finance streamer adapter
//!   - `websocket`: Downstream `/ws/market/{symbol}` server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      +-------------+     +-----------+
//! Yahoo streamer ----->| FeedClient  |---->|   Relay   |---> Client 1 (AAPL)
//!   (one session)      | (generation)|     | registry  |---> Client 2 (AAPL)
//!                      +-------------+     +-----------+---> Client 3 (MSFT)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::feed::{FeedPhase, FeedSnapshot, FeedState};
pub use domain::streaming::{
    ClientMessage, ControlMessage, OutboundMessage, RelayMessage, Symbol, SymbolError,
};
pub use domain::subscription::{
    ConnectionId, DownstreamConnection, RegistryStats, SendError, SharedConnection,
    SubscriptionRegistry,
};

// Application
pub use application::ports::{
    DemandSource, FeedConnector, FeedError, FeedEvent, FeedSession, UpstreamFeed,
};
pub use application::services::{ClientSession, FanoutReport, Relay, RelayStats, SessionFlow};

// Upstream feed
pub use infrastructure::feed::{FeedClient, FeedClientConfig, ReconnectConfig, ReconnectPolicy};
pub use infrastructure::yahoo::{YahooConfig, YahooConnector};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{RelayServer, RelayServerError, WsState};

// Infrastructure config
pub use infrastructure::config::{
    ClientSettings, ConfigError, FeedSettings, RelayConfig, ServerSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
