//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: frames received, decode errors, reconnects, connection state
//! - **Routing**: trades routed, unknown symbols, routing latency
//! - **Delivery**: frames delivered and dropped per outcome
//! - **Registry**: connected subscribers and known symbols
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::bitmex::FeedConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Feed
    describe_counter!(
        "bitmex_relay_frames_received_total",
        "Total frames received from the BitMEX feed"
    );
    describe_counter!(
        "bitmex_relay_decode_errors_total",
        "Total feed frames skipped because they could not be decoded"
    );
    describe_counter!(
        "bitmex_relay_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_gauge!(
        "bitmex_relay_feed_state",
        "Feed connection state (0=connecting, 1=live, 2=degraded, 3=closed)"
    );

    // Routing
    describe_counter!(
        "bitmex_relay_trades_routed_total",
        "Total trade events routed to subscribers"
    );
    describe_counter!(
        "bitmex_relay_unknown_symbols_total",
        "Total trade events dropped for a symbol unknown after refresh"
    );
    describe_histogram!(
        "bitmex_relay_routing_seconds",
        "Time to route one trade event to every interested subscriber"
    );

    // Delivery
    describe_counter!(
        "bitmex_relay_deliveries_total",
        "Total delivery attempts by outcome"
    );

    // Registry
    describe_gauge!(
        "bitmex_relay_subscriber_connections",
        "Number of connected subscriber sessions"
    );
    describe_gauge!("bitmex_relay_known_symbols", "Number of known symbols");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for delivery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Frame queued for the subscriber.
    Delivered,
    /// Subscriber queue full; frame dropped.
    Dropped,
    /// Subscriber connection already closed.
    Closed,
}

impl DeliveryOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
            Self::Closed => "closed",
        }
    }
}

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("bitmex_relay_frames_received_total").increment(1);
}

/// Record a feed frame that could not be decoded.
pub fn record_decode_error() {
    counter!("bitmex_relay_decode_errors_total").increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("bitmex_relay_reconnects_total").increment(1);
}

/// Update the feed state gauge.
pub fn set_feed_state(state: FeedConnectionState) {
    gauge!("bitmex_relay_feed_state").set(f64::from(state.as_gauge()));
}

/// Record one routed trade event.
pub fn record_trade_routed() {
    counter!("bitmex_relay_trades_routed_total").increment(1);
}

/// Record a trade event dropped for an unknown symbol.
pub fn record_unknown_symbol() {
    counter!("bitmex_relay_unknown_symbols_total").increment(1);
}

/// Record delivery attempts with the given outcome.
pub fn record_deliveries(outcome: DeliveryOutcome, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        "bitmex_relay_deliveries_total",
        "outcome" => outcome.as_str()
    )
    .increment(count);
}

/// Record routing duration for one event.
pub fn record_routing_duration(duration: Duration) {
    histogram!("bitmex_relay_routing_seconds").record(duration.as_secs_f64());
}

/// Update the connected subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriber_connections(count: usize) {
    gauge!("bitmex_relay_subscriber_connections").set(count as f64);
}

/// Update the known symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_known_symbols(count: usize) {
    gauge!("bitmex_relay_known_symbols").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
