//! Configuration Module
//!
//! Environment-driven configuration for the relay service.

mod settings;

pub use settings::{
    ClientSettings, ConfigError, FeedSettings, MAX_HEARTBEAT, RelayConfig, ServerSettings,
};
