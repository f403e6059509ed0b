//! Shared harness for integration tests: a scripted upstream provider and
//! a relay wired to it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use quote_relay::infrastructure::websocket::router;
use quote_relay::{
    DemandSource, FeedClient, FeedClientConfig, FeedConnector, FeedError, FeedEvent, FeedPhase,
    FeedSession, FeedState, ReconnectConfig, Relay, SubscriptionRegistry, Symbol, WsState,
};

/// One frame the scripted session yields; `None` ends the session cleanly.
pub type Frame = Option<Result<Value, FeedError>>;

/// Upstream calls observed by the scripted provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Close,
}

/// What the next `connect` does.
pub enum Script {
    Refuse,
    Accept(mpsc::UnboundedReceiver<Frame>),
}

/// Provider whose sessions are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an accepting session and return its frame sender.
    pub fn accept(&self) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(Script::Accept(rx));
        tx
    }

    /// Queue a refused connection attempt.
    pub fn refuse(&self) {
        self.scripts.lock().push_back(Script::Refuse);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl FeedConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, FeedError> {
        self.calls.lock().push(Call::Connect);
        // an exhausted script refuses
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Refuse);
        match script {
            Script::Refuse => Err(FeedError::Connect("refused".to_string())),
            Script::Accept(frames) => Ok(Box::new(ScriptedSession {
                frames,
                calls: Arc::clone(&self.calls),
            })),
        }
    }
}

struct ScriptedSession {
    frames: mpsc::UnboundedReceiver<Frame>,
    calls: Arc<Mutex<Vec<Call>>>,
}

fn names(symbols: &[Symbol]) -> Vec<String> {
    symbols.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl FeedSession for ScriptedSession {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Subscribe(names(symbols)));
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        self.calls.lock().push(Call::Unsubscribe(names(symbols)));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<Value, FeedError>> {
        self.frames.recv().await.flatten()
    }

    async fn close(&mut self) {
        self.calls.lock().push(Call::Close);
    }
}

/// Fast backoff for tests.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

pub fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

/// A relay wired to a scripted provider.
pub struct Harness {
    pub connector: ScriptedConnector,
    pub relay: Arc<Relay>,
    pub feed: Arc<FeedClient<ScriptedConnector>>,
    pub state: Arc<FeedState>,
}

impl Harness {
    /// Build a relay with its dispatch task running; the feed is not started.
    pub fn new(connector: ScriptedConnector, max_attempts: u32) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let state = Arc::new(FeedState::new());
        let (events_tx, events_rx) = mpsc::channel::<FeedEvent>(64);
        let demand: Arc<dyn DemandSource> = registry.clone();

        let feed = Arc::new(FeedClient::new(
            connector.clone(),
            demand,
            state.clone(),
            events_tx,
            FeedClientConfig {
                reconnect: fast_reconnect(max_attempts),
                delivery_timeout: Duration::from_millis(100),
            },
        ));
        let relay = Arc::new(Relay::new(registry, feed.clone(), state.clone()));
        relay.spawn_dispatch(events_rx);

        Self {
            connector,
            relay,
            feed,
            state,
        }
    }

    /// Start the feed and wait for a live session.
    pub async fn start_listening(&self) {
        self.relay.start().await;
        let state = self.state.clone();
        wait_until(move || state.phase() == FeedPhase::Listening).await;
    }

    /// Serve the WebSocket route on an ephemeral port.
    pub async fn serve(&self, queue_capacity: usize) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(WsState::new(self.relay.clone(), queue_capacity)));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}
