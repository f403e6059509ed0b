//! Feed lifecycle state shared between the supervisor, the relay, and the
//! health server.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Lifecycle phase of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedPhase {
    /// Not started, or stopped on purpose.
    Stopped,
    /// Opening a session.
    Connecting,
    /// Session open and streaming.
    Listening,
    /// Waiting before the next connect attempt.
    Backoff,
    /// Retries exhausted; needs a manual restart.
    Failed,
}

impl FeedPhase {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Backoff => "backoff",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-light record of the feed lifecycle.
///
/// Written by the feed supervisor, read by everything else. The generation
/// counter is bumped on every successful connect; payloads tagged with an
/// older generation belong to a superseded session.
#[derive(Debug)]
pub struct FeedState {
    phase: RwLock<FeedPhase>,
    generation: AtomicU64,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    subscription_count: AtomicUsize,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create a stopped state at generation 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: RwLock::new(FeedPhase::Stopped),
            generation: AtomicU64::new(0),
            last_connected_at: RwLock::new(None),
            error_message: RwLock::new(None),
            subscription_count: AtomicUsize::new(0),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Set the lifecycle phase.
    pub fn set_phase(&self, phase: FeedPhase) {
        *self.phase.write() = phase;
    }

    /// Record a successful connect and return the new generation.
    pub fn mark_connected(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.phase.write() = FeedPhase::Listening;
        *self.last_connected_at.write() = Some(Utc::now());
        *self.error_message.write() = None;
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        generation
    }

    /// Record a failure message.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.error_message.write() = Some(message.into());
    }

    /// Record the number of consecutive failed attempts.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Record the size of the tracked upstream subscription set.
    pub fn set_subscription_count(&self, count: usize) {
        self.subscription_count.store(count, Ordering::Relaxed);
    }

    /// Count a decoded upstream payload.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a payload dropped before fan-out.
    pub fn increment_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> FeedPhase {
        *self.phase.read()
    }

    /// Current session generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether retries are exhausted.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.phase() == FeedPhase::Failed
    }

    /// Consistent-enough copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            phase: self.phase(),
            generation: self.generation(),
            last_connected_at: *self.last_connected_at.read(),
            error_message: self.error_message.read().clone(),
            subscription_count: self.subscription_count.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FeedState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    /// Lifecycle phase.
    pub phase: FeedPhase,
    /// Session generation.
    pub generation: u64,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last failure message, cleared on connect.
    pub error_message: Option<String>,
    /// Tracked upstream subscriptions.
    pub subscription_count: usize,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
    /// Decoded upstream payloads.
    pub messages_received: u64,
    /// Payloads dropped before fan-out.
    pub messages_dropped: u64,
}
