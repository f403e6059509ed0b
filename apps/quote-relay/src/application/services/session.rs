//! Client Session
//!
//! Transport-agnostic handling of one downstream connection: registration,
//! the ping/subscribe protocol, and guaranteed cleanup. The session is an
//! RAII guard; dropping it unregisters whatever symbol it currently holds.

use std::sync::Arc;

use crate::domain::streaming::{ClientMessage, ControlMessage, Symbol};
use crate::domain::subscription::{SendError, SharedConnection};

use super::relay::Relay;

/// What the transport should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    /// Keep reading.
    Continue,
    /// Stop reading and close the connection.
    Close,
}

/// One registered downstream client.
pub struct ClientSession {
    relay: Arc<Relay>,
    conn: SharedConnection,
    symbol: Symbol,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("connection", &self.conn.id())
            .field("symbol", &self.symbol)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Register `conn` under `symbol` and acknowledge the connection.
    ///
    /// Returns `None` if the relay is shut down; the connection has been
    /// closed in that case.
    #[must_use]
    pub fn open(relay: Arc<Relay>, conn: SharedConnection, symbol: Symbol) -> Option<Self> {
        if !relay.add_subscriber(Arc::clone(&conn), &symbol) {
            return None;
        }

        let session = Self {
            relay,
            conn,
            symbol,
        };

        tracing::info!(
            connection = %session.conn.id(),
            symbol = %session.symbol,
            "Client connected"
        );
        // a dead link surfaces on the next read
        let _ = session.reply(ControlMessage::connected(session.symbol.clone()));
        Some(session)
    }

    /// The symbol this client currently receives.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Handle one text frame from the client.
    pub fn handle_text(&mut self, text: &str) -> SessionFlow {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    connection = %self.conn.id(),
                    error = %e,
                    "Ignoring malformed client frame"
                );
                return SessionFlow::Continue;
            }
        };

        match message {
            ClientMessage::Ping { timestamp } => self.reply(ControlMessage::pong(timestamp)),
            ClientMessage::Subscribe { symbol } => self.handle_subscribe(&symbol),
        }
    }

    fn handle_subscribe(&mut self, raw: &str) -> SessionFlow {
        if raw.trim().is_empty() {
            tracing::debug!(connection = %self.conn.id(), "Ignoring subscribe without symbol");
            return SessionFlow::Continue;
        }

        let new = match Symbol::parse(raw) {
            Ok(symbol) => symbol,
            Err(e) => {
                tracing::warn!(
                    connection = %self.conn.id(),
                    symbol = raw,
                    error = %e,
                    "Ignoring subscribe with invalid symbol"
                );
                return SessionFlow::Continue;
            }
        };

        if !self
            .relay
            .switch_subscription(&self.conn, &self.symbol, &new)
        {
            return SessionFlow::Close;
        }

        tracing::info!(
            connection = %self.conn.id(),
            from = %self.symbol,
            to = %new,
            "Client switched symbol"
        );
        self.symbol = new;
        self.reply(ControlMessage::subscription_changed(self.symbol.clone()))
    }

    fn reply(&self, message: ControlMessage) -> SessionFlow {
        match self.conn.send(message.into()) {
            Ok(()) => SessionFlow::Continue,
            Err(SendError::Full) => {
                tracing::debug!(connection = %self.conn.id(), "Outbound queue full, reply dropped");
                SessionFlow::Continue
            }
            Err(SendError::Closed) => SessionFlow::Close,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.relay.remove_subscriber(self.conn.id(), &self.symbol);
        tracing::info!(
            connection = %self.conn.id(),
            symbol = %self.symbol,
            "Client disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::UpstreamFeed;
    use crate::domain::feed::FeedState;
    use crate::domain::streaming::OutboundMessage;
    use crate::domain::subscription::{ConnectionId, DownstreamConnection, SubscriptionRegistry};

    #[derive(Default)]
    struct RecordingFeed {
        subscribed: Mutex<Vec<Symbol>>,
        unsubscribed: Mutex<Vec<Symbol>>,
    }

    #[async_trait]
    impl UpstreamFeed for RecordingFeed {
        fn subscribe(&self, symbols: &[Symbol]) {
            self.subscribed.lock().extend_from_slice(symbols);
        }

        fn unsubscribe(&self, symbols: &[Symbol]) {
            self.unsubscribed.lock().extend_from_slice(symbols);
        }

        async fn start(&self) {}

        async fn stop(&self) {}
    }

    struct Frames {
        id: ConnectionId,
        sent: Mutex<Vec<Value>>,
        closed: AtomicBool,
    }

    impl Frames {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }

        fn last(&self) -> Value {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    impl DownstreamConnection for Frames {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SendError::Closed);
            }
            self.sent.lock().push(serde_json::to_value(&message).unwrap());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<Relay>, Arc<RecordingFeed>) {
        let feed = Arc::new(RecordingFeed::default());
        let relay = Arc::new(Relay::new(
            Arc::new(SubscriptionRegistry::new()),
            feed.clone(),
            Arc::new(FeedState::new()),
        ));
        (relay, feed)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn open_registers_and_acknowledges() {
        let (relay, feed) = setup();
        let conn = Frames::new();

        let session = ClientSession::open(relay.clone(), conn.clone(), sym("aapl")).unwrap();

        assert_eq!(session.symbol(), &sym("AAPL"));
        assert!(relay.registry().contains(&sym("AAPL"), conn.id));
        assert_eq!(*feed.subscribed.lock(), vec![sym("AAPL")]);
        assert_eq!(
            conn.last(),
            json!({
                "type": "connection",
                "status": "connected",
                "symbol": "AAPL",
                "message": "Subscribed to AAPL"
            })
        );
    }

    #[test]
    fn ping_echoes_timestamp() {
        let (relay, _feed) = setup();
        let conn = Frames::new();
        let mut session = ClientSession::open(relay, conn.clone(), sym("AAPL")).unwrap();

        assert_eq!(
            session.handle_text(r#"{"type":"ping","timestamp":123}"#),
            SessionFlow::Continue
        );
        assert_eq!(conn.last(), json!({"type": "pong", "timestamp": 123}));

        session.handle_text(r#"{"type":"ping"}"#);
        assert_eq!(conn.last(), json!({"type": "pong", "timestamp": null}));
    }

    #[test]
    fn subscribe_switches_symbol() {
        let (relay, feed) = setup();
        let conn = Frames::new();
        let mut session = ClientSession::open(relay.clone(), conn.clone(), sym("AAPL")).unwrap();

        session.handle_text(r#"{"type":"subscribe","symbol":"msft"}"#);

        assert_eq!(session.symbol(), &sym("MSFT"));
        assert!(!relay.registry().contains(&sym("AAPL"), conn.id));
        assert!(relay.registry().contains(&sym("MSFT"), conn.id));
        assert_eq!(*feed.unsubscribed.lock(), vec![sym("AAPL")]);
        assert_eq!(
            conn.last(),
            json!({
                "type": "subscription_changed",
                "symbol": "MSFT",
                "message": "Switched to MSFT"
            })
        );
    }

    #[test]
    fn malformed_and_invalid_frames_are_ignored() {
        let (relay, _feed) = setup();
        let conn = Frames::new();
        let mut session = ClientSession::open(relay.clone(), conn.clone(), sym("AAPL")).unwrap();
        let before = conn.sent.lock().len();

        for frame in [
            "not json",
            r#"{"type":"dance"}"#,
            r#"{"type":"subscribe"}"#,
            r#"{"type":"subscribe","symbol":"   "}"#,
            r#"{"type":"subscribe","symbol":"AA PL"}"#,
        ] {
            assert_eq!(session.handle_text(frame), SessionFlow::Continue);
        }

        assert_eq!(conn.sent.lock().len(), before);
        assert_eq!(session.symbol(), &sym("AAPL"));
        assert!(relay.registry().contains(&sym("AAPL"), conn.id));
    }

    #[test]
    fn drop_unregisters_current_symbol() {
        let (relay, feed) = setup();
        let conn = Frames::new();
        let mut session = ClientSession::open(relay.clone(), conn.clone(), sym("AAPL")).unwrap();
        session.handle_text(r#"{"type":"subscribe","symbol":"MSFT"}"#);

        drop(session);

        assert!(relay.registry().symbols().is_empty());
        let unsubscribed: HashSet<_> = feed.unsubscribed.lock().iter().cloned().collect();
        assert_eq!(unsubscribed, HashSet::from([sym("AAPL"), sym("MSFT")]));
    }

    #[test]
    fn drop_runs_on_panic() {
        let (relay, _feed) = setup();
        let conn = Frames::new();
        let relay_for_panic = relay.clone();
        let conn_for_panic = conn.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _session =
                ClientSession::open(relay_for_panic, conn_for_panic, sym("AAPL")).unwrap();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert!(relay.registry().symbols().is_empty());
    }

    #[test]
    fn reply_to_closed_connection_ends_session() {
        let (relay, _feed) = setup();
        let conn = Frames::new();
        let mut session = ClientSession::open(relay, conn.clone(), sym("AAPL")).unwrap();
        conn.close();

        assert_eq!(
            session.handle_text(r#"{"type":"ping","timestamp":1}"#),
            SessionFlow::Close
        );
    }
}
