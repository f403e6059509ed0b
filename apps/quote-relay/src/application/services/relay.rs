//! Relay Service
//!
//! Orchestrates the subscription registry and the upstream feed: keeps one
//! upstream subscription per demanded symbol and fans upstream payloads out
//! to every interested downstream connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedEvent, UpstreamFeed};
use crate::domain::feed::{FeedSnapshot, FeedState};
use crate::domain::streaming::{MessageError, OutboundMessage, RelayMessage, Symbol};
use crate::domain::subscription::{
    ConnectionId, RegistryStats, SendError, SharedConnection, SubscriptionRegistry,
};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Reports
// =============================================================================

/// Outcome of fanning out one upstream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    /// Symbol the payload was for.
    pub symbol: Symbol,
    /// Connections the message was queued to.
    pub delivered: usize,
    /// Connections that were skipped because their queue was full.
    pub dropped: usize,
    /// Connections removed because they were closed.
    pub removed: usize,
}

impl FanoutReport {
    const fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            delivered: 0,
            dropped: 0,
            removed: 0,
        }
    }
}

/// Relay-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Registry size.
    pub subscriptions: RegistryStats,
    /// Feed lifecycle.
    pub feed: FeedSnapshot,
    /// Whether the feed has given up.
    pub degraded: bool,
}

// =============================================================================
// Relay
// =============================================================================

/// The relay core.
///
/// Owns the registry and drives the upstream feed. All methods are safe to
/// call from any task; none of them hold a lock across an `.await`.
pub struct Relay {
    registry: Arc<SubscriptionRegistry>,
    feed: Arc<dyn UpstreamFeed>,
    feed_state: Arc<FeedState>,
    dispatch: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .field("phase", &self.feed_state.phase())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay over an existing registry and feed.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        feed: Arc<dyn UpstreamFeed>,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            registry,
            feed,
            feed_state,
            dispatch: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The shared feed state.
    #[must_use]
    pub fn feed_state(&self) -> &Arc<FeedState> {
        &self.feed_state
    }

    /// Register `conn` under `symbol`, subscribing upstream on the first
    /// listener.
    ///
    /// Returns `false` and closes the connection if the relay is shut down.
    pub fn add_subscriber(&self, conn: SharedConnection, symbol: &Symbol) -> bool {
        if self.is_closed() {
            conn.close();
            return false;
        }

        let conn_id = conn.id();
        if self.registry.register(symbol, Arc::clone(&conn)) {
            tracing::info!(%symbol, "First listener, subscribing upstream");
            self.feed.subscribe(std::slice::from_ref(symbol));
        }

        // shutdown may have drained the registry between the check and here
        if self.is_closed() {
            self.remove_subscriber(conn_id, symbol);
            conn.close();
            return false;
        }

        tracing::debug!(%symbol, connection = %conn_id, "Subscriber added");
        self.publish_connection_gauge();
        true
    }

    /// Unregister `conn_id` from `symbol`, unsubscribing upstream on the
    /// last listener. Unknown pairs are a no-op.
    pub fn remove_subscriber(&self, conn_id: ConnectionId, symbol: &Symbol) {
        if self.registry.unregister(symbol, conn_id) {
            tracing::info!(%symbol, "Last listener gone, unsubscribing upstream");
            self.feed.unsubscribe(std::slice::from_ref(symbol));
        }

        tracing::debug!(%symbol, connection = %conn_id, "Subscriber removed");
        self.publish_connection_gauge();
    }

    /// Move `conn` from `old` to `new`.
    ///
    /// Switching to the same symbol is a no-op. Returns `false` if the
    /// relay is shut down and the connection was closed instead.
    pub fn switch_subscription(&self, conn: &SharedConnection, old: &Symbol, new: &Symbol) -> bool {
        if old == new {
            return !self.is_closed();
        }

        self.remove_subscriber(conn.id(), old);
        self.add_subscriber(Arc::clone(conn), new)
    }

    /// Parse one upstream payload and fan it out.
    ///
    /// # Errors
    ///
    /// Returns `MessageError` if the payload carries no usable symbol; the
    /// payload is dropped.
    pub fn on_upstream_message(&self, payload: &Value) -> Result<FanoutReport, MessageError> {
        let started = Instant::now();

        let message = RelayMessage::from_upstream(payload).map_err(|e| {
            tracing::warn!(error = %e, "Dropping malformed upstream payload");
            metrics::record_malformed_message("payload");
            e
        })?;

        let symbol = message.symbol.clone();
        let listeners = self.registry.listeners(&symbol);
        let mut report = FanoutReport::empty(symbol);

        if listeners.is_empty() {
            tracing::trace!(symbol = %report.symbol, "No listeners, discarding");
            return Ok(report);
        }

        let outbound = OutboundMessage::Quote(message);
        for conn in listeners {
            match conn.send(outbound.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendError::Full) => {
                    tracing::debug!(connection = %conn.id(), "Outbound queue full, dropping");
                    metrics::record_message_dropped(DropReason::SlowClient);
                    report.dropped += 1;
                }
                Err(SendError::Closed) => {
                    tracing::debug!(connection = %conn.id(), "Connection closed during fan-out");
                    metrics::record_message_dropped(DropReason::ClientClosed);
                    self.remove_subscriber(conn.id(), &report.symbol);
                    conn.close();
                    report.removed += 1;
                }
            }
        }

        metrics::record_messages_sent(report.delivered as u64);
        metrics::record_fanout_duration(started.elapsed());
        Ok(report)
    }

    /// Spawn the task consuming feed events.
    ///
    /// Replaces any previous dispatch task.
    pub fn spawn_dispatch(self: &Arc<Self>, mut events: mpsc::Receiver<FeedEvent>) {
        let cancel = CancellationToken::new();
        let relay = Arc::clone(self);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        relay.handle_event(event);
                    }
                }
            }
            tracing::debug!("Feed dispatch stopped");
        });

        if let Some((previous, previous_cancel)) = self.dispatch.lock().replace((handle, cancel)) {
            previous_cancel.cancel();
            previous.abort();
        }
    }

    fn handle_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Message {
                generation,
                payload,
            } => {
                if generation < self.feed_state.generation() {
                    tracing::trace!(generation, "Discarding payload from superseded session");
                    metrics::record_message_dropped(DropReason::StaleGeneration);
                    self.feed_state.increment_dropped();
                    return;
                }
                if let Ok(report) = self.on_upstream_message(&payload) {
                    tracing::trace!(
                        symbol = %report.symbol,
                        delivered = report.delivered,
                        dropped = report.dropped,
                        removed = report.removed,
                        "Fan-out complete"
                    );
                }
            }
            FeedEvent::Connected { generation } => {
                tracing::info!(generation, "Upstream feed connected");
            }
            FeedEvent::Disconnected { error } => {
                tracing::warn!(%error, "Upstream feed disconnected");
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Upstream feed reconnecting"
                );
            }
            FeedEvent::Terminated { attempts } => {
                tracing::error!(
                    attempts,
                    "Upstream feed gave up, relay degraded until restarted"
                );
            }
        }
    }

    /// Start the upstream feed.
    pub async fn start(&self) {
        if self.is_closed() {
            return;
        }
        self.feed.start().await;
    }

    /// Stop and restart the upstream feed with a fresh retry budget.
    pub async fn restart_feed(&self) {
        if self.is_closed() {
            return;
        }
        tracing::info!("Restarting upstream feed");
        self.feed.stop().await;
        self.feed.start().await;
    }

    /// Whether the feed has exhausted its retries.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.feed_state.is_failed()
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            subscriptions: self.registry.stats(),
            feed: self.feed_state.snapshot(),
            degraded: self.is_degraded(),
        }
    }

    /// Stop ingestion, then close every downstream connection.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!("Relay shutting down");
        self.feed.stop().await;

        let dispatch = self.dispatch.lock().take();
        if let Some((handle, cancel)) = dispatch {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatch task ended abnormally");
            }
        }

        let connections = self.registry.drain();
        tracing::info!(count = connections.len(), "Closing downstream connections");
        for conn in connections {
            conn.close();
        }
        self.publish_connection_gauge();
    }

    fn publish_connection_gauge(&self) {
        metrics::set_downstream_connections(self.registry.stats().connection_count);
    }
}

// =============================================================================
// Tests
// =============================================================================
