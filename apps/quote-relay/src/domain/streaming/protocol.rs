//! Downstream client protocol frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::quote::RelayMessage;
use super::symbol::Symbol;

/// Frames a downstream client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness observed; the timestamp is echoed back verbatim.
    Ping {
        /// Opaque client value, `null` if absent.
        #[serde(default)]
        timestamp: Value,
    },
    /// Switch this connection to another symbol.
    Subscribe {
        /// Raw requested symbol; empty if absent.
        #[serde(default)]
        symbol: String,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serde error for malformed JSON, a missing or unknown
    /// `type`, or mistyped fields.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Control frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Sent once after the connection is registered.
    Connection {
        /// Always `"connected"`.
        status: &'static str,
        /// Subscribed symbol.
        symbol: Symbol,
        /// Human readable confirmation.
        message: String,
    },
    /// Reply to a client ping.
    Pong {
        /// Echo of the ping timestamp.
        timestamp: Value,
    },
    /// Sent after a successful symbol switch.
    SubscriptionChanged {
        /// New symbol.
        symbol: Symbol,
        /// Human readable confirmation.
        message: String,
    },
}

impl ControlMessage {
    /// Connection acknowledgement for `symbol`.
    #[must_use]
    pub fn connected(symbol: Symbol) -> Self {
        let message = format!("Subscribed to {symbol}");
        Self::Connection {
            status: "connected",
            symbol,
            message,
        }
    }

    /// Pong echoing `timestamp`.
    #[must_use]
    pub const fn pong(timestamp: Value) -> Self {
        Self::Pong { timestamp }
    }

    /// Switch confirmation for `symbol`.
    #[must_use]
    pub fn subscription_changed(symbol: Symbol) -> Self {
        let message = format!("Switched to {symbol}");
        Self::SubscriptionChanged { symbol, message }
    }
}

/// Any frame the relay sends to a downstream client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Protocol control frame.
    Control(ControlMessage),
    /// Relayed quote.
    Quote(RelayMessage),
}

impl OutboundMessage {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serde error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ControlMessage> for OutboundMessage {
    fn from(msg: ControlMessage) -> Self {
        Self::Control(msg)
    }
}

impl From<RelayMessage> for OutboundMessage {
    fn from(msg: RelayMessage) -> Self {
        Self::Quote(msg)
    }
}
