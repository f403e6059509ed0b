//! Yahoo Finance Streamer Adapter
//!
//! Implements the feed ports against `wss://streamer.finance.yahoo.com`.
//!
//! - `codec`: subscription frames and base64 protobuf pricing frames
//! - `connector`: WebSocket sessions with an inline heartbeat

mod codec;
mod connector;
mod pricing;

pub use codec::{CodecError, YahooCodec};
pub use connector::{
    DEFAULT_STREAMER_URL, HeartbeatConfig, YahooConfig, YahooConnector, YahooSession,
};
pub use pricing::PricingData;
