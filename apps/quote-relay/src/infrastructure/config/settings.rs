//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from `MARKET_*` environment
//! variables. Unparseable values fall back to defaults; values that parse
//! but make no sense are rejected by [`RelayConfig::validate`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::infrastructure::feed::{FeedClientConfig, ReconnectConfig};
use crate::infrastructure::yahoo::{DEFAULT_STREAMER_URL, HeartbeatConfig, YahooConfig};

/// Upper bound for heartbeat interval and timeout.
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(3600);

/// Listen addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address for both servers.
    pub host: IpAddr,
    /// WebSocket relay port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5000,
            health_port: 8082,
        }
    }
}

impl ServerSettings {
    /// Address of the WebSocket relay.
    #[must_use]
    pub const fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Address of the health server.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.health_port)
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Streamer WebSocket URL.
    pub url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering the session dead.
    pub heartbeat_timeout: Duration,
    /// Upper bound for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of each delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the feed → relay event channel.
    pub event_capacity: usize,
    /// How long a payload may wait for room in the event channel.
    pub delivery_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAMER_URL.to_string(),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(2000),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            event_capacity: 1024,
            delivery_timeout: Duration::from_millis(100),
        }
    }
}

/// Downstream client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Outbound queue size per client.
    pub queue_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    /// Listen addresses.
    pub server: ServerSettings,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Downstream client settings.
    pub client: ClientSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let server_defaults = ServerSettings::default();
        let feed_defaults = FeedSettings::default();
        let client_defaults = ClientSettings::default();

        let server = ServerSettings {
            host: env.parse("MARKET_HOST", server_defaults.host),
            port: env.parse("MARKET_PORT", server_defaults.port),
            health_port: env.parse("MARKET_HEALTH_PORT", server_defaults.health_port),
        };

        let feed = FeedSettings {
            url: env
                .string("MARKET_FEED_URL")
                .unwrap_or(feed_defaults.url),
            heartbeat_interval: env.secs(
                "MARKET_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "MARKET_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            connect_timeout: env.secs("MARKET_CONNECT_TIMEOUT_SECS", feed_defaults.connect_timeout),
            reconnect_delay_initial: env.millis(
                "MARKET_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "MARKET_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "MARKET_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("MARKET_RECONNECT_JITTER", feed_defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "MARKET_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            event_capacity: env.parse("MARKET_FEED_EVENT_CAPACITY", feed_defaults.event_capacity),
            delivery_timeout: env.millis(
                "MARKET_FEED_DELIVERY_TIMEOUT_MS",
                feed_defaults.delivery_timeout,
            ),
        };

        let client = ClientSettings {
            queue_capacity: env.parse(
                "MARKET_CLIENT_QUEUE_CAPACITY",
                client_defaults.queue_capacity,
            ),
        };

        let config = Self {
            server,
            feed,
            client,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.feed.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidFeedUrl(self.feed.url.clone()));
        }
        if self.client.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("MARKET_CLIENT_QUEUE_CAPACITY"));
        }
        if self.feed.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("MARKET_FEED_EVENT_CAPACITY"));
        }
        if self.feed.reconnect_delay_initial.is_zero() {
            return Err(ConfigError::ZeroDuration("MARKET_RECONNECT_DELAY_INITIAL_MS"));
        }
        if self.feed.reconnect_delay_max < self.feed.reconnect_delay_initial {
            return Err(ConfigError::InvalidBackoff {
                initial: self.feed.reconnect_delay_initial,
                max: self.feed.reconnect_delay_max,
            });
        }
        if !(self.feed.reconnect_delay_multiplier >= 1.0
            && self.feed.reconnect_delay_multiplier.is_finite())
        {
            return Err(ConfigError::InvalidMultiplier(
                self.feed.reconnect_delay_multiplier,
            ));
        }
        if !(0.0..=1.0).contains(&self.feed.reconnect_jitter) {
            return Err(ConfigError::InvalidJitter(self.feed.reconnect_jitter));
        }
        if self.feed.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("MARKET_HEARTBEAT_INTERVAL_SECS"));
        }
        if self.feed.heartbeat_interval > MAX_HEARTBEAT {
            return Err(ConfigError::DurationTooLong {
                key: "MARKET_HEARTBEAT_INTERVAL_SECS",
                max: MAX_HEARTBEAT,
            });
        }
        if self.feed.heartbeat_timeout > MAX_HEARTBEAT {
            return Err(ConfigError::DurationTooLong {
                key: "MARKET_HEARTBEAT_TIMEOUT_SECS",
                max: MAX_HEARTBEAT,
            });
        }
        Ok(())
    }

    /// Backoff settings for the feed supervisor.
    #[must_use]
    pub const fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.feed.reconnect_delay_initial,
            max_delay: self.feed.reconnect_delay_max,
            multiplier: self.feed.reconnect_delay_multiplier,
            jitter_factor: self.feed.reconnect_jitter,
            max_attempts: self.feed.max_reconnect_attempts,
        }
    }

    /// Supervisor settings.
    #[must_use]
    pub const fn feed_client_config(&self) -> FeedClientConfig {
        FeedClientConfig {
            reconnect: self.reconnect_config(),
            delivery_timeout: self.feed.delivery_timeout,
        }
    }

    /// Yahoo connector settings.
    #[must_use]
    pub fn yahoo_config(&self) -> YahooConfig {
        YahooConfig {
            url: self.feed.url.clone(),
            heartbeat: HeartbeatConfig {
                ping_interval: self.feed.heartbeat_interval,
                pong_timeout: self.feed.heartbeat_timeout,
            },
            connect_timeout: self.feed.connect_timeout,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Feed URL is not a WebSocket URL.
    #[error("feed url must start with ws:// or wss://, got {0:?}")]
    InvalidFeedUrl(String),
    /// A capacity is zero.
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    /// A duration is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// A duration exceeds its upper bound.
    #[error("{key} must be at most {max:?}")]
    DurationTooLong {
        /// Variable name.
        key: &'static str,
        /// Upper bound.
        max: Duration,
    },
    /// Maximum delay is below the initial delay.
    #[error("reconnect max delay {max:?} is below initial delay {initial:?}")]
    InvalidBackoff {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Multiplier would shrink or break the backoff.
    #[error("reconnect multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(f64),
    /// Jitter outside `[0, 1]`.
    #[error("reconnect jitter must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
