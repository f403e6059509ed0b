//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: upstream payloads, relayed frames, drops by reason
//! - **Connections**: downstream clients and upstream subscriptions
//! - **Feed**: reconnects and errors by kind
//! - **Latency**: fan-out duration per upstream payload
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_relay_upstream_messages_total",
        "Total payloads decoded from the upstream feed"
    );
    describe_counter!(
        "quote_relay_malformed_messages_total",
        "Total upstream frames or payloads that could not be used"
    );
    describe_counter!(
        "quote_relay_messages_sent_total",
        "Total relay frames queued to downstream clients"
    );
    describe_counter!(
        "quote_relay_messages_dropped_total",
        "Total messages dropped by reason"
    );

    describe_gauge!(
        "quote_relay_downstream_connections",
        "Number of registered downstream connections"
    );
    describe_gauge!(
        "quote_relay_upstream_subscriptions",
        "Number of symbols subscribed on the upstream session"
    );

    describe_counter!(
        "quote_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "quote_relay_feed_errors_total",
        "Total upstream feed errors by kind"
    );

    describe_histogram!(
        "quote_relay_fanout_seconds",
        "Time to fan one upstream payload out to its listeners"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A client's outbound queue was full.
    SlowClient,
    /// A client was gone by the time of delivery.
    ClientClosed,
    /// The payload came from a superseded session.
    StaleGeneration,
    /// The relay did not accept the payload in time.
    DeliveryTimeout,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SlowClient => "slow_client",
            Self::ClientClosed => "client_closed",
            Self::StaleGeneration => "stale_generation",
            Self::DeliveryTimeout => "delivery_timeout",
        }
    }
}

/// Record a payload decoded from the upstream feed.
pub fn record_upstream_message() {
    counter!("quote_relay_upstream_messages_total").increment(1);
}

/// Record an unusable upstream frame or payload.
pub fn record_malformed_message(reason: &'static str) {
    counter!("quote_relay_malformed_messages_total", "reason" => reason).increment(1);
}

/// Record relay frames queued to downstream clients.
pub fn record_messages_sent(count: u64) {
    counter!("quote_relay_messages_sent_total").increment(count);
}

/// Record a dropped message.
pub fn record_message_dropped(reason: DropReason) {
    counter!(
        "quote_relay_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the downstream connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_connections(count: usize) {
    gauge!("quote_relay_downstream_connections").set(count as f64);
}

/// Update the upstream subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_subscriptions(count: usize) {
    gauge!("quote_relay_upstream_subscriptions").set(count as f64);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_relay_reconnects_total").increment(1);
}

/// Record an upstream feed error.
pub fn record_feed_error(kind: &'static str) {
    counter!("quote_relay_feed_errors_total", "kind" => kind).increment(1);
}

/// Record the fan-out duration of one payload.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("quote_relay_fanout_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
