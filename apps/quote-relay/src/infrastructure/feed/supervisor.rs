//! Feed Supervisor
//!
//! Owns the single logical upstream connection. A supervised task connects
//! through a [`FeedConnector`], replays the demand set on every connect,
//! applies subscribe/unsubscribe commands, forwards decoded payloads to the
//! relay, and reconnects with backoff until the retry budget runs out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    DemandSource, FeedConnector, FeedError, FeedEvent, FeedSession, UpstreamFeed,
};
use crate::domain::feed::{FeedPhase, FeedState};
use crate::domain::streaming::Symbol;
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the feed supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedClientConfig {
    /// Backoff between failed sessions.
    pub reconnect: ReconnectConfig,
    /// How long to wait for the relay to accept a payload.
    pub delivery_timeout: Duration,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            delivery_timeout: Duration::from_millis(100),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum FeedCommand {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
}

// =============================================================================
// Feed Client
// =============================================================================

struct Inner<C> {
    connector: C,
    demand: Arc<dyn DemandSource>,
    state: Arc<FeedState>,
    events: mpsc::Sender<FeedEvent>,
    config: FeedClientConfig,
    commands: tokio::sync::Mutex<mpsc::UnboundedReceiver<FeedCommand>>,
    tracked: parking_lot::Mutex<HashSet<Symbol>>,
}

/// Supervised upstream feed client.
///
/// At most one supervisor task runs at a time. `subscribe` and
/// `unsubscribe` only enqueue commands; the task reconciles them against
/// the demand source when it has a live session, and replays the whole
/// demand set on every (re)connect.
pub struct FeedClient<C> {
    inner: Arc<Inner<C>>,
    command_tx: mpsc::UnboundedSender<FeedCommand>,
    task: tokio::sync::Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl<C> std::fmt::Debug for FeedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("phase", &self.inner.state.phase())
            .field("tracked", &self.inner.tracked.lock().len())
            .finish_non_exhaustive()
    }
}

impl<C: FeedConnector> FeedClient<C> {
    /// Create a stopped feed client.
    #[must_use]
    pub fn new(
        connector: C,
        demand: Arc<dyn DemandSource>,
        state: Arc<FeedState>,
        events: mpsc::Sender<FeedEvent>,
        config: FeedClientConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                connector,
                demand,
                state,
                events,
                config,
                commands: tokio::sync::Mutex::new(command_rx),
                tracked: parking_lot::Mutex::new(HashSet::new()),
            }),
            command_tx,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Symbols subscribed on the live session.
    #[must_use]
    pub fn tracked_symbols(&self) -> HashSet<Symbol> {
        self.inner.tracked.lock().clone()
    }

    /// Whether a supervisor task is running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished())
    }

    fn enqueue(&self, command: FeedCommand) {
        // without a live session the next connect replays the demand set
        if self.inner.state.phase() != FeedPhase::Listening {
            tracing::trace!(?command, "No live session, leaving command to replay");
            return;
        }
        if self.command_tx.send(command).is_err() {
            tracing::debug!("Feed command channel closed");
        }
    }
}

#[async_trait::async_trait]
impl<C: FeedConnector> UpstreamFeed for FeedClient<C> {
    fn subscribe(&self, symbols: &[Symbol]) {
        if !symbols.is_empty() {
            self.enqueue(FeedCommand::Subscribe(symbols.to_vec()));
        }
    }

    fn unsubscribe(&self, symbols: &[Symbol]) {
        if !symbols.is_empty() {
            self.enqueue(FeedCommand::Unsubscribe(symbols.to_vec()));
        }
    }

    async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|(handle, _)| !handle.is_finished()) {
            tracing::debug!("Feed supervisor already running");
            return;
        }

        let cancel = CancellationToken::new();
        self.inner.state.set_phase(FeedPhase::Connecting);
        let handle = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *task = Some((handle, cancel));
        tracing::info!("Feed supervisor started");
    }

    async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some((handle, cancel)) = task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Feed supervisor ended abnormally");
            }
        }

        self.inner.set_tracked(HashSet::new());
        self.inner.state.set_phase(FeedPhase::Stopped);
        tracing::info!("Feed supervisor stopped");
    }
}

// =============================================================================
// Supervisor Task
// =============================================================================

impl<C: FeedConnector> Inner<C> {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut commands = self.commands.lock().await;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.state.set_phase(FeedPhase::Connecting);
            let outcome = self
                .connect_and_listen(&cancel, &mut commands, &mut policy)
                .await;
            self.set_tracked(HashSet::new());

            let Err(error) = outcome else {
                return;
            };

            tracing::warn!(error = %error, "Upstream session failed");
            metrics::record_feed_error(error.kind());
            self.state.set_error(error.to_string());
            self.emit(FeedEvent::Disconnected {
                error: error.to_string(),
            })
            .await;

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Upstream retries exhausted, giving up");
                self.state.set_reconnect_attempts(attempts);
                self.state.set_phase(FeedPhase::Failed);
                self.emit(FeedEvent::Terminated { attempts }).await;
                return;
            };

            let attempt = policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream feed"
            );
            metrics::record_reconnect();
            self.state.set_reconnect_attempts(attempt);
            self.state.set_phase(FeedPhase::Backoff);
            self.emit(FeedEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Feed supervisor cancelled during backoff");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one session. `Ok` means cancelled; `Err` means the session is gone.
    async fn connect_and_listen(
        &self,
        cancel: &CancellationToken,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedError> {
        let mut session = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            session = self.connector.connect() => session?,
        };

        let generation = self.state.mark_connected();
        policy.reset();

        // replay below covers commands left over from the previous session
        while commands.try_recv().is_ok() {}

        let mut demand: Vec<Symbol> = self.demand.symbols().into_iter().collect();
        demand.sort();
        if !demand.is_empty() {
            match cancel.run_until_cancelled(session.subscribe(&demand)).await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    session.close().await;
                    return Err(e);
                }
                None => {
                    session.close().await;
                    return Ok(());
                }
            }
        }
        tracing::info!(generation, symbols = demand.len(), "Upstream session ready");
        self.set_tracked(demand.into_iter().collect());
        self.emit(FeedEvent::Connected { generation }).await;

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                Some(command) = commands.recv() => {
                    let reconciled = cancel
                        .run_until_cancelled(self.reconcile(session.as_mut(), command))
                        .await;
                    match reconciled {
                        Some(Ok(())) => {}
                        Some(Err(e)) => break Err(e),
                        None => break Ok(()),
                    }
                }
                message = session.next_message() => match message {
                    Some(Ok(payload)) => self.deliver(generation, payload).await,
                    Some(Err(e)) if !e.is_fatal() => {
                        tracing::debug!(error = %e, "Skipping undecodable upstream frame");
                        metrics::record_malformed_message("frame");
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Err(FeedError::Closed),
                },
            }
        };

        session.close().await;
        result
    }

    async fn reconcile(
        &self,
        session: &mut dyn FeedSession,
        command: FeedCommand,
    ) -> Result<(), FeedError> {
        let demand = self.demand.symbols();

        match command {
            FeedCommand::Subscribe(symbols) => {
                let missing: Vec<Symbol> = {
                    let tracked = self.tracked.lock();
                    symbols
                        .into_iter()
                        .filter(|s| demand.contains(s) && !tracked.contains(s))
                        .collect()
                };
                if missing.is_empty() {
                    return Ok(());
                }
                session.subscribe(&missing).await?;
                tracing::debug!(symbols = ?missing, "Subscribed upstream");
                self.update_tracked(|tracked| tracked.extend(missing));
            }
            FeedCommand::Unsubscribe(symbols) => {
                let stale: Vec<Symbol> = {
                    let tracked = self.tracked.lock();
                    symbols
                        .into_iter()
                        .filter(|s| tracked.contains(s) && !demand.contains(s))
                        .collect()
                };
                if stale.is_empty() {
                    return Ok(());
                }
                session.unsubscribe(&stale).await?;
                tracing::debug!(symbols = ?stale, "Unsubscribed upstream");
                self.update_tracked(|tracked| {
                    for symbol in &stale {
                        tracked.remove(symbol);
                    }
                });
            }
        }

        Ok(())
    }

    async fn deliver(&self, generation: u64, payload: Value) {
        self.state.increment_messages();
        metrics::record_upstream_message();

        let event = FeedEvent::Message {
            generation,
            payload,
        };
        match self
            .events
            .send_timeout(event, self.config.delivery_timeout)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::debug!("Relay busy, dropping upstream payload");
                metrics::record_message_dropped(DropReason::DeliveryTimeout);
                self.state.increment_dropped();
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!("Relay event channel closed");
            }
        }
    }

    async fn emit(&self, event: FeedEvent) {
        if self
            .events
            .send_timeout(event, self.config.delivery_timeout)
            .await
            .is_err()
        {
            tracing::debug!("Feed lifecycle event not delivered");
        }
    }

    fn set_tracked(&self, symbols: HashSet<Symbol>) {
        self.update_tracked(|tracked| *tracked = symbols);
    }

    fn update_tracked(&self, f: impl FnOnce(&mut HashSet<Symbol>)) {
        let count = {
            let mut tracked = self.tracked.lock();
            f(&mut tracked);
            tracked.len()
        };
        self.state.set_subscription_count(count);
        metrics::set_upstream_subscriptions(count);
    }
}

// =============================================================================
// Tests
// =============================================================================
