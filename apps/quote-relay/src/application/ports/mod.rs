//! Port Interfaces
//!
//! Contracts between the relay core and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector` / `FeedSession`: one live connection to a provider
//! - `UpstreamFeed`: the supervised feed the relay drives
//!
//! ## Driver Ports (Inbound)
//!
//! - `DemandSource`: the symbols the feed must be subscribed to

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::streaming::Symbol;
use crate::domain::subscription::SubscriptionRegistry;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a feed session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Could not open a session.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider closed the session or the stream ended.
    #[error("session closed by peer")]
    Closed,

    /// No pong within the heartbeat deadline.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// A single frame could not be decoded.
    #[error("undecodable frame: {0}")]
    Decode(String),
}

impl FeedError {
    /// Whether the session is unusable and the reconnect policy applies.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Transport(_) => "transport",
            Self::Closed => "closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Decode(_) => "decode",
        }
    }
}

// =============================================================================
// Provider Ports
// =============================================================================

/// Opens sessions to a push-based market data provider.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Connect` if the session cannot be established.
    async fn connect(&self) -> Result<Box<dyn FeedSession>, FeedError>;
}

/// One live provider session.
#[async_trait]
pub trait FeedSession: Send {
    /// Subscribe to `symbols` on this session.
    ///
    /// # Errors
    ///
    /// Returns a fatal `FeedError` if the request cannot be written.
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError>;

    /// Unsubscribe from `symbols` on this session.
    ///
    /// # Errors
    ///
    /// Returns a fatal `FeedError` if the request cannot be written.
    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError>;

    /// Wait for the next decoded payload.
    ///
    /// `None` means the session ended cleanly. Non-fatal errors may be
    /// followed by more payloads.
    async fn next_message(&mut self) -> Option<Result<Value, FeedError>>;

    /// Close the session. Idempotent.
    async fn close(&mut self);
}

// =============================================================================
// Relay-facing Ports
// =============================================================================

/// The supervised upstream feed as seen by the relay.
///
/// `subscribe` and `unsubscribe` never block; the feed applies them on its
/// own task.
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    /// Request upstream subscriptions.
    fn subscribe(&self, symbols: &[Symbol]);

    /// Request upstream unsubscriptions.
    fn unsubscribe(&self, symbols: &[Symbol]);

    /// Start the supervisor. No-op if already running.
    async fn start(&self);

    /// Stop the supervisor and close the session.
    async fn stop(&self);
}

/// Source of the current demand set.
pub trait DemandSource: Send + Sync {
    /// Symbols that at least one downstream connection wants.
    fn symbols(&self) -> HashSet<Symbol>;
}

impl DemandSource for SubscriptionRegistry {
    fn symbols(&self) -> HashSet<Symbol> {
        Self::symbols(self)
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// Events emitted by the feed supervisor to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A session is open and the demand set has been subscribed.
    Connected {
        /// Session generation.
        generation: u64,
    },
    /// The session failed.
    Disconnected {
        /// Failure description.
        error: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// A decoded payload.
    Message {
        /// Generation of the session that produced it.
        generation: u64,
        /// Provider payload.
        payload: Value,
    },
    /// Retries exhausted; the supervisor has exited.
    Terminated {
        /// Consecutive failures at exit.
        attempts: u32,
    },
}
