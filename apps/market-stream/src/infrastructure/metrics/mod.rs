//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of decoded frames by stream kind, and decode failures
//! - **Connections**: State transitions, reconnect attempts, staleness
//! - **Subscriptions**: Active subscription count
//! - **Latency**: Frame decode and callback dispatch time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{ConnectionState, MarketEvent};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
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
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total frames decoded into market events"
    );
    describe_counter!(
        "market_stream_decode_errors_total",
        "Total frames dropped because they failed to decode"
    );

    // Connection counters
    describe_counter!(
        "market_stream_state_transitions_total",
        "Total connection state transitions by target state"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total WebSocket reconnection attempts"
    );
    describe_counter!(
        "market_stream_staleness_timeouts_total",
        "Total connections dropped for going silent"
    );
    describe_counter!(
        "market_stream_retries_exhausted_total",
        "Total subscriptions that gave up reconnecting"
    );

    // Subscription gauges
    describe_gauge!(
        "market_stream_subscriptions_active",
        "Number of registered subscriptions"
    );

    // Latency histograms
    describe_histogram!(
        "market_stream_frame_processing_seconds",
        "Time to decode a frame and run the update callback"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric label for a market event.
const fn event_kind(event: &MarketEvent) -> &'static str {
    match event {
        MarketEvent::Candle(_) => "candle",
        MarketEvent::Ticker(_) => "ticker",
    }
}

/// Record a decoded market event.
pub fn record_frame_received(event: &MarketEvent) {
    counter!(
        "market_stream_frames_received_total",
        "kind" => event_kind(event)
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("market_stream_decode_errors_total").increment(1);
}

/// Record a connection state transition.
pub fn record_state_transition(state: ConnectionState) {
    counter!(
        "market_stream_state_transitions_total",
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a connection dropped for staleness.
pub fn record_staleness_timeout() {
    counter!("market_stream_staleness_timeouts_total").increment(1);
}

/// Record a subscription that exhausted its retry budget.
pub fn record_retries_exhausted() {
    counter!("market_stream_retries_exhausted_total").increment(1);
}

/// Update the registered subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("market_stream_subscriptions_active").set(count as f64);
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("market_stream_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
