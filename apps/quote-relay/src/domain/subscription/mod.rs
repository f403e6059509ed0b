//! Subscription Registry
//!
//! Tracks which downstream connections are interested in which symbol.
//! The key-set of the registry is the demand set: the symbols the upstream
//! feed must be subscribed to.
//!
//! # Design
//!
//! - One `parking_lot::RwLock` guards the whole map; callers get snapshots
//!   and send outside the lock.
//! - A symbol key exists iff at least one connection is registered under it.
//! - `register` / `unregister` report the 0→1 and 1→0 transitions so the
//!   caller can drive upstream subscribe/unsubscribe exactly once per symbol.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::streaming::{OutboundMessage, Symbol};

// =============================================================================
// Connection Types
// =============================================================================

/// Unique identifier for a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a message could not be handed to a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The link is gone; the connection should be removed.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is saturated; this message is dropped.
    #[error("outbound queue full")]
    Full,
}

/// A downstream client as seen by the registry and the relay.
///
/// Implementations must not block in `send`.
pub trait DownstreamConnection: Send + Sync {
    /// Stable identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Queue a message for delivery.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Closed` if the connection is gone and
    /// `SendError::Full` if its outbound queue is saturated.
    fn send(&self, message: OutboundMessage) -> Result<(), SendError>;

    /// Ask the transport to close. Idempotent.
    fn close(&self);
}

/// Shared handle to a downstream connection.
pub type SharedConnection = Arc<dyn DownstreamConnection>;

// =============================================================================
// Registry
// =============================================================================

/// Maps each symbol to the connections listening to it.
///
/// # Example
///
/// ```rust,ignore
/// let registry = SubscriptionRegistry::new();
///
/// // First listener for AAPL: caller subscribes upstream
/// assert!(registry.register(&aapl, conn_a.clone()));
/// // Second listener: no upstream change
/// assert!(!registry.register(&aapl, conn_b.clone()));
///
/// assert!(!registry.unregister(&aapl, conn_a.id()));
/// // Last listener gone: caller unsubscribes upstream
/// assert!(registry.unregister(&aapl, conn_b.id()));
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: RwLock<HashMap<Symbol, HashMap<ConnectionId, SharedConnection>>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("SubscriptionRegistry")
            .field("symbol_count", &stats.symbol_count)
            .field("connection_count", &stats.connection_count)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `symbol`.
    ///
    /// Returns `true` if this is the first listener for the symbol.
    /// Registering the same connection twice is a no-op returning `false`.
    pub fn register(&self, symbol: &Symbol, conn: SharedConnection) -> bool {
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(symbol.clone()).or_default();
        let was_empty = entry.is_empty();
        entry.entry(conn.id()).or_insert(conn);
        was_empty
    }

    /// Unregister `conn_id` from `symbol`.
    ///
    /// Returns `true` if the symbol lost its last listener, in which case
    /// the key is removed. Unknown symbols and connections are a no-op.
    pub fn unregister(&self, symbol: &Symbol, conn_id: ConnectionId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entry) = listeners.get_mut(symbol) else {
            return false;
        };

        if entry.remove(&conn_id).is_none() {
            return false;
        }

        if entry.is_empty() {
            listeners.remove(symbol);
            return true;
        }

        false
    }

    /// Snapshot of the connections listening to `symbol`.
    #[must_use]
    pub fn listeners(&self, symbol: &Symbol) -> Vec<SharedConnection> {
        self.listeners
            .read()
            .get(symbol)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The current demand set.
    #[must_use]
    pub fn symbols(&self) -> HashSet<Symbol> {
        self.listeners.read().keys().cloned().collect()
    }

    /// Whether `conn_id` is registered under `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol, conn_id: ConnectionId) -> bool {
        self.listeners
            .read()
            .get(symbol)
            .is_some_and(|conns| conns.contains_key(&conn_id))
    }

    /// Number of connections listening to `symbol`.
    #[must_use]
    pub fn listener_count(&self, symbol: &Symbol) -> usize {
        self.listeners.read().get(symbol).map_or(0, HashMap::len)
    }

    /// Symbol and connection counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let listeners = self.listeners.read();
        RegistryStats {
            symbol_count: listeners.len(),
            connection_count: listeners.values().map(HashMap::len).sum(),
        }
    }

    /// Remove every registration, returning the connections that were held.
    pub fn drain(&self) -> Vec<SharedConnection> {
        let drained = std::mem::take(&mut *self.listeners.write());
        drained
            .into_values()
            .flat_map(HashMap::into_values)
            .collect()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry size at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Number of distinct symbols with listeners.
    pub symbol_count: usize,
    /// Number of registrations across all symbols.
    pub connection_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    struct NullConnection {
        id: ConnectionId,
    }

    impl DownstreamConnection for NullConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn send(&self, _message: OutboundMessage) -> Result<(), SendError> {
            Ok(())
        }

        fn close(&self) {}
    }

    fn conn() -> SharedConnection {
        Arc::new(NullConnection {
            id: ConnectionId::new(),
        })
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn register_new_symbol_is_first() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.register(&sym("AAPL"), conn()));
        assert!(registry.symbols().contains(&sym("AAPL")));
    }

    #[test]
    fn register_existing_symbol_is_not_first() {
        let registry = SubscriptionRegistry::new();

        registry.register(&sym("AAPL"), conn());

        assert!(!registry.register(&sym("AAPL"), conn()));
        assert_eq!(registry.listener_count(&sym("AAPL")), 2);
    }

    #[test]
    fn register_same_connection_twice_is_noop() {
        let registry = SubscriptionRegistry::new();
        let a = conn();

        registry.register(&sym("AAPL"), a.clone());

        assert!(!registry.register(&sym("AAPL"), a));
        assert_eq!(registry.listener_count(&sym("AAPL")), 1);
    }

    #[test]
    fn unregister_with_remaining_listeners() {
        let registry = SubscriptionRegistry::new();
        let a = conn();
        registry.register(&sym("AAPL"), a.clone());
        registry.register(&sym("AAPL"), conn());

        assert!(!registry.unregister(&sym("AAPL"), a.id()));
        assert!(registry.symbols().contains(&sym("AAPL")));
    }

    #[test]
    fn unregister_last_listener_removes_key() {
        let registry = SubscriptionRegistry::new();
        let a = conn();
        registry.register(&sym("AAPL"), a.clone());

        assert!(registry.unregister(&sym("AAPL"), a.id()));
        assert!(registry.symbols().is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        let a = conn();
        registry.register(&sym("AAPL"), a.clone());

        assert!(!registry.unregister(&sym("MSFT"), a.id()));
        assert!(!registry.unregister(&sym("AAPL"), ConnectionId::new()));
        assert_eq!(registry.listener_count(&sym("AAPL")), 1);
    }

    #[test]
    fn unregister_twice_reports_transition_once() {
        let registry = SubscriptionRegistry::new();
        let a = conn();
        registry.register(&sym("AAPL"), a.clone());

        assert!(registry.unregister(&sym("AAPL"), a.id()));
        assert!(!registry.unregister(&sym("AAPL"), a.id()));
    }

    #[test]
    fn listeners_snapshot_is_per_symbol() {
        let registry = SubscriptionRegistry::new();
        let a = conn();
        let b = conn();
        registry.register(&sym("AAPL"), a.clone());
        registry.register(&sym("MSFT"), b.clone());

        let aapl: Vec<_> = registry.listeners(&sym("AAPL")).iter().map(|c| c.id()).collect();

        assert_eq!(aapl, vec![a.id()]);
        assert!(registry.contains(&sym("MSFT"), b.id()));
        assert!(!registry.contains(&sym("MSFT"), a.id()));
        assert!(registry.listeners(&sym("GOOG")).is_empty());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = SubscriptionRegistry::new();
        registry.register(&sym("AAPL"), conn());
        registry.register(&sym("AAPL"), conn());
        registry.register(&sym("MSFT"), conn());

        let stats = registry.stats();

        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.connection_count, 3);
    }

    #[test]
    fn drain_empties_registry() {
        let registry = SubscriptionRegistry::new();
        registry.register(&sym("AAPL"), conn());
        registry.register(&sym("MSFT"), conn());

        let drained = registry.drain();

        assert_eq!(drained.len(), 2);
        assert!(registry.symbols().is_empty());
    }

    #[test]
    fn thread_safety_concurrent_registrations() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.register(&sym(&format!("SYM{i}")), conn());
                r.register(&sym("SHARED"), conn())
            }));
        }

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();

        // exactly one thread saw SHARED go 0→1
        assert_eq!(firsts, 1);
        let stats = registry.stats();
        assert_eq!(stats.symbol_count, 11);
        assert_eq!(stats.connection_count, 20);
    }

    #[test]
    fn thread_safety_concurrent_unregistrations() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let conns: Vec<_> = (0..10).map(|_| conn()).collect();
        for c in &conns {
            registry.register(&sym("SHARED"), c.clone());
        }

        let handles: Vec<_> = conns
            .iter()
            .map(|c| {
                let r = Arc::clone(&registry);
                let id = c.id();
                thread::spawn(move || r.unregister(&sym("SHARED"), id))
            })
            .collect();

        let lasts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|last| *last)
            .count();

        assert_eq!(lasts, 1);
        assert!(registry.symbols().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize, usize),
        Unregister(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..6usize).prop_map(|(s, c)| Op::Register(s, c)),
            (0..4usize, 0..6usize).prop_map(|(s, c)| Op::Unregister(s, c)),
        ]
    }

    proptest! {
        #[test]
        fn keys_are_exactly_symbols_with_listeners(ops in proptest::collection::vec(op(), 0..64)) {
            let symbols: Vec<_> = ["AAPL", "MSFT", "GOOG", "BTC-USD"].iter().map(|s| sym(s)).collect();
            let conns: Vec<_> = (0..6).map(|_| conn()).collect();
            let registry = SubscriptionRegistry::new();
            let mut model: HashMap<usize, HashSet<usize>> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(s, c) => {
                        let first = registry.register(&symbols[s], conns[c].clone());
                        let set = model.entry(s).or_default();
                        prop_assert_eq!(first, set.is_empty());
                        set.insert(c);
                    }
                    Op::Unregister(s, c) => {
                        let last = registry.unregister(&symbols[s], conns[c].id());
                        let removed = model.get_mut(&s).is_some_and(|set| set.remove(&c));
                        let now_empty = model.get(&s).is_some_and(HashSet::is_empty);
                        prop_assert_eq!(last, removed && now_empty);
                        if now_empty {
                            model.remove(&s);
                        }
                    }
                }

                let expected: HashSet<_> = model.keys().map(|s| symbols[*s].clone()).collect();
                prop_assert_eq!(registry.symbols(), expected);
            }
        }
    }
}
