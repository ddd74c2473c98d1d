//! Prometheus Metrics Module
//!
//! Exposes stream client metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by op, and frames that failed to decode
//! - **Control**: Outbound control messages by op
//! - **Connection**: Connection state and reconnection attempts
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! library users that never call it pay nothing.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the configured metrics port.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

const FRAMES_RECEIVED: &str = "betfair_stream_frames_received_total";
const DECODE_ERRORS: &str = "betfair_stream_decode_errors_total";
const CONTROL_MESSAGES_SENT: &str = "betfair_stream_control_messages_sent_total";
const CONNECTED: &str = "betfair_stream_connected";
const RECONNECTS: &str = "betfair_stream_reconnects_total";

// =============================================================================
// Exporter
// =============================================================================

/// Install the Prometheus recorder and its HTTP listener on `port`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;

    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(FRAMES_RECEIVED, "Total frames received from the stream by op");
    describe_counter!(DECODE_ERRORS, "Total frames skipped because they failed to decode");
    describe_counter!(
        CONTROL_MESSAGES_SENT,
        "Total control messages written to the stream by op"
    );
    describe_gauge!(CONNECTED, "Whether the stream connection is open (1) or not (0)");
    describe_counter!(RECONNECTS, "Total reconnection attempts");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Label for an inbound op. Unknown ops share one label to bound cardinality.
#[must_use]
pub fn op_label(op: &str) -> &'static str {
    match op {
        "connection" => "connection",
        "status" => "status",
        "mcm" => "mcm",
        "ocm" => "ocm",
        "authentication" => "authentication",
        "heartbeat" => "heartbeat",
        "marketSubscription" => "market_subscription",
        "orderSubscription" => "order_subscription",
        _ => "other",
    }
}

/// Record a frame received from the stream.
pub fn record_frame_received(op: &str) {
    counter!(FRAMES_RECEIVED, "op" => op_label(op)).increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_decode_error() {
    counter!(DECODE_ERRORS).increment(1);
}

/// Record a control message written to the stream.
pub fn record_control_message(op: &str) {
    counter!(CONTROL_MESSAGES_SENT, "op" => op_label(op)).increment(1);
}

/// Update the connection state.
pub fn set_connected(connected: bool) {
    gauge!(CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!(RECONNECTS).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
