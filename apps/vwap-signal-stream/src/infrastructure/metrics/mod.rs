//! Prometheus Metrics Module
//!
//! Exposes stream metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: frames received and dropped, websocket errors, reconnects
//! - **Pipeline**: ticks processed or suppressed, resolver fallbacks,
//!   candles, session resets, current VWAP
//! - **Signals**: dispatches, failures, dispatch latency
//!
//! Recording before [`init_metrics`] is a no-op.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register metric descriptions.
///
/// Later calls return the handle installed by the first.
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
    // Feed
    describe_counter!(
        "vwap_stream_frames_received_total",
        "Binary frames received from the market feed"
    );
    describe_counter!(
        "vwap_stream_frames_dropped_total",
        "Frames dropped before aggregation, by reason"
    );
    describe_counter!(
        "vwap_stream_websocket_errors_total",
        "Feed websocket errors by type"
    );
    describe_counter!(
        "vwap_stream_reconnects_total",
        "Feed reconnection attempts"
    );

    // Pipeline
    describe_counter!(
        "vwap_stream_ticks_processed_total",
        "Ticks that reached the aggregators"
    );
    describe_counter!(
        "vwap_stream_ticks_suppressed_total",
        "Ticks without new traded volume"
    );
    describe_counter!(
        "vwap_stream_resolver_fallbacks_total",
        "Cumulative volume rollbacks resolved with last traded quantity"
    );
    describe_counter!("vwap_stream_candles_closed_total", "Candles completed");
    describe_counter!(
        "vwap_stream_session_resets_total",
        "VWAP session resets"
    );
    describe_gauge!("vwap_stream_vwap", "Current session VWAP");
    describe_histogram!(
        "vwap_stream_tick_processing_seconds",
        "Time to decode and aggregate one frame"
    );

    // Signals
    describe_counter!(
        "vwap_stream_signals_dispatched_total",
        "Signal lookups dispatched on a VWAP touch"
    );
    describe_counter!(
        "vwap_stream_signals_generated_total",
        "Signals generated, by direction"
    );
    describe_counter!(
        "vwap_stream_dispatch_failures_total",
        "Failed signal lookups, by kind"
    );
    describe_histogram!(
        "vwap_stream_dispatch_seconds",
        "Signal lookup duration"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a frame never reaches the aggregators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame shorter than a quote packet.
    TooShort,
    /// Not a quote packet.
    UnexpectedType,
    /// Engine channel full.
    ChannelFull,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::TooShort => "too_short",
            Self::UnexpectedType => "unexpected_type",
            Self::ChannelFull => "channel_full",
        }
    }
}

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("vwap_stream_frames_received_total").increment(1);
}

/// Record a dropped frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "vwap_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a feed websocket error.
pub fn record_websocket_error(error_type: &str) {
    counter!(
        "vwap_stream_websocket_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("vwap_stream_reconnects_total").increment(1);
}

/// Record a tick that reached the aggregators.
pub fn record_tick_processed() {
    counter!("vwap_stream_ticks_processed_total").increment(1);
}

/// Record a tick suppressed for lack of new volume.
pub fn record_tick_suppressed() {
    counter!("vwap_stream_ticks_suppressed_total").increment(1);
}

/// Record a cumulative-volume rollback.
pub fn record_resolver_fallback() {
    counter!("vwap_stream_resolver_fallbacks_total").increment(1);
}

/// Record a completed candle.
pub fn record_candle_closed() {
    counter!("vwap_stream_candles_closed_total").increment(1);
}

/// Record a VWAP session reset.
pub fn record_session_reset() {
    counter!("vwap_stream_session_resets_total").increment(1);
}

/// Update the VWAP gauge.
pub fn set_vwap(vwap: f64) {
    gauge!("vwap_stream_vwap").set(vwap);
}

/// Record frame processing duration.
pub fn record_tick_duration(duration: Duration) {
    histogram!("vwap_stream_tick_processing_seconds").record(duration.as_secs_f64());
}

/// Record a dispatched signal lookup.
pub fn record_signal_dispatched() {
    counter!("vwap_stream_signals_dispatched_total").increment(1);
}

/// Record a generated signal.
pub fn record_signal_generated(signal: &'static str) {
    counter!(
        "vwap_stream_signals_generated_total",
        "signal" => signal
    )
    .increment(1);
}

/// Record a failed signal lookup.
pub fn record_dispatch_failure(kind: &'static str) {
    counter!(
        "vwap_stream_dispatch_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record signal lookup duration.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("vwap_stream_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::TooShort.as_str(), "too_short");
        assert_eq!(DropReason::UnexpectedType.as_str(), "unexpected_type");
        assert_eq!(DropReason::ChannelFull.as_str(), "channel_full");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_frame_dropped(DropReason::TooShort);
        set_vwap(100.0);
        record_tick_duration(Duration::from_micros(5));
    }
}
