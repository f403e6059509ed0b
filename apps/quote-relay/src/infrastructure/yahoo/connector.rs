//! Yahoo Streamer Connector
//!
//! Opens WebSocket sessions to the Yahoo Finance streamer and adapts them to
//! the `FeedConnector` / `FeedSession` ports.
//!
//! Each session runs its own heartbeat: a ping every `ping_interval`, and
//! `FeedError::HeartbeatTimeout` if no inbound frame arrives within
//! `pong_timeout` of an unanswered ping. Every write is bounded by the same
//! `pong_timeout`; a stalled write fails the session with a transport error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::YahooCodec;
use crate::application::ports::{FeedConnector, FeedError, FeedSession};
use crate::domain::streaming::Symbol;

/// Default Yahoo streamer endpoint.
pub const DEFAULT_STREAMER_URL: &str = "wss://streamer.finance.yahoo.com/?version=2";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Configuration
// =============================================================================

/// Heartbeat timing for upstream sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// How long an unanswered ping may wait before the session is dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Connector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YahooConfig {
    /// Streamer WebSocket URL.
    pub url: String,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Upper bound for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAMER_URL.to_string(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens Yahoo streamer sessions.
#[derive(Debug, Clone, Default)]
pub struct YahooConnector {
    config: YahooConfig,
}

impl YahooConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: YahooConfig) -> Self {
        Self { config }
    }

    /// The configured streamer URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl FeedConnector for YahooConnector {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, FeedError> {
        tracing::info!(url = %self.config.url, "Connecting to Yahoo streamer");

        let handshake = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (stream, _response) = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| FeedError::Connect("handshake timed out".to_string()))?
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        tracing::info!("Connected to Yahoo streamer");
        Ok(Box::new(YahooSession::new(stream, self.config.heartbeat)))
    }
}

// =============================================================================
// Session
// =============================================================================

/// One live streamer session.
pub struct YahooSession {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    codec: YahooCodec,
    ping: Interval,
    pong_timeout: Duration,
    awaiting_since: Option<Instant>,
    closed: bool,
}

impl std::fmt::Debug for YahooSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YahooSession")
            .field("awaiting_since", &self.awaiting_since)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl YahooSession {
    fn new(stream: WsStream, heartbeat: HeartbeatConfig) -> Self {
        let (write, read) = stream.split();
        let mut ping = tokio::time::interval_at(
            Instant::now() + heartbeat.ping_interval,
            heartbeat.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            write,
            read,
            codec: YahooCodec::new(),
            ping,
            pong_timeout: heartbeat.pong_timeout,
            awaiting_since: None,
            closed: false,
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::Closed);
        }
        self.send_frame(Message::Text(text.into())).await
    }

    async fn send_frame(&mut self, message: Message) -> Result<(), FeedError> {
        let result = send_bounded(&mut self.write, message, self.pong_timeout).await;
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    fn decode(&self, text: &str) -> Result<Value, FeedError> {
        self.codec
            .decode(text)
            .map_err(|e| FeedError::Decode(e.to_string()))
    }
}

/// Send one frame, failing with `FeedError::Transport` after `limit`.
async fn send_bounded<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), FeedError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result.map_err(|e| FeedError::Transport(e.to_string())),
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis(), "Upstream write stalled");
            Err(FeedError::Transport("upstream write timed out".to_string()))
        }
    }
}

fn pong_deadline(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl FeedSession for YahooSession {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        if symbols.is_empty() {
            return Ok(());
        }
        let frame = self
            .codec
            .encode_subscribe(symbols)
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        tracing::debug!(count = symbols.len(), "Sending upstream subscribe");
        self.send_text(frame).await
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        if symbols.is_empty() {
            return Ok(());
        }
        let frame = self
            .codec
            .encode_unsubscribe(symbols)
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        tracing::debug!(count = symbols.len(), "Sending upstream unsubscribe");
        self.send_text(frame).await
    }

    async fn next_message(&mut self) -> Option<Result<Value, FeedError>> {
        loop {
            if self.closed {
                return None;
            }

            let deadline = self.awaiting_since.map(|sent| sent + self.pong_timeout);

            tokio::select! {
                _ = self.ping.tick() => {
                    if self.awaiting_since.is_none() {
                        self.awaiting_since = Some(Instant::now());
                    }
                    if let Err(e) = self.send_frame(Message::Ping(Vec::<u8>::new().into())).await {
                        return Some(Err(e));
                    }
                }
                () = pong_deadline(deadline) => {
                    tracing::warn!("Upstream heartbeat timeout");
                    return Some(Err(FeedError::HeartbeatTimeout));
                }
                frame = self.read.next() => {
                    // any inbound frame proves the link is alive
                    self.awaiting_since = None;

                    match frame {
                        Some(Ok(Message::Text(text))) => return Some(self.decode(text.as_str())),
                        Some(Ok(Message::Binary(bytes))) => {
                            let decoded = std::str::from_utf8(&bytes)
                                .map_err(|e| FeedError::Decode(e.to_string()))
                                .and_then(|text| self.decode(text));
                            return Some(decoded);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = self.send_frame(Message::Pong(data)).await {
                                return Some(Err(e));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Upstream sent close frame");
                            self.closed = true;
                            return Some(Err(FeedError::Closed));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.closed = true;
                            return Some(Err(FeedError::Transport(e.to_string())));
                        }
                        None => {
                            tracing::info!("Upstream stream ended");
                            self.closed = true;
                            return None;
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match tokio::time::timeout(self.pong_timeout, self.write.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Error closing upstream session"),
            Err(_) => tracing::debug!("Upstream close handshake timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite;

    use super::*;

    #[test]
    fn default_config_targets_yahoo_v2() {
        let config = YahooConfig::default();
        assert_eq!(config.url, "wss://streamer.finance.yahoo.com/?version=2");
        assert_eq!(config.heartbeat.ping_interval, Duration::from_secs(20));
        assert_eq!(config.heartbeat.pong_timeout, Duration::from_secs(20));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_is_a_connect_error() {
        let connector = YahooConnector::new(YahooConfig {
            url: "ws://127.0.0.1:1/".to_string(),
            connect_timeout: Duration::from_secs(2),
            ..YahooConfig::default()
        });

        let result = connector.connect().await;

        assert!(matches!(result, Err(FeedError::Connect(_))));
    }

    #[tokio::test]
    async fn stalled_write_is_a_transport_error() {
        let mut stalled = Box::pin(futures_util::sink::unfold((), |(), _message: Message| {
            std::future::pending::<Result<(), tungstenite::Error>>()
        }));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            send_bounded(&mut stalled, Message::Text("{}".to_string().into()), Duration::from_millis(50)),
        )
        .await
        .expect("bounded send must not hang");

        assert!(matches!(result, Err(FeedError::Transport(_))));
    }
}
