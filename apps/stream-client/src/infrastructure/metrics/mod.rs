//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames and bytes received, frames dropped at the boundary
//! - **Messages**: Classified messages by frame format
//! - **Connections**: Connected gauge, connection errors, reconnect attempts
//! - **Workers**: Observer failures and forced worker terminations
//!
//! Recording functions are no-ops until a recorder is installed, so library
//! users that never call [`init_metrics`] pay nothing.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::message::FrameFormat;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
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
        "stream_client_frames_received_total",
        "Total frames read from the socket"
    );
    describe_counter!(
        "stream_client_bytes_received_total",
        "Total bytes read from the socket"
    );
    describe_counter!(
        "stream_client_frames_dropped_total",
        "Total frames dropped because the inbound channel was full"
    );
    describe_counter!(
        "stream_client_messages_classified_total",
        "Total messages classified by frame format"
    );

    // Connection metrics
    describe_gauge!(
        "stream_client_connected",
        "Whether the client currently holds a live connection (1) or not (0)"
    );
    describe_counter!(
        "stream_client_connection_errors_total",
        "Total connect, read and write failures"
    );
    describe_counter!(
        "stream_client_reconnects_total",
        "Total reconnection attempts"
    );

    // Worker metrics
    describe_counter!(
        "stream_client_observer_failures_total",
        "Total observer callbacks that failed or panicked"
    );
    describe_counter!(
        "stream_client_forced_terminations_total",
        "Total connection workers force-terminated during shutdown"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Stage of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Resolving or connecting.
    Connect,
    /// Reading from the socket.
    Read,
    /// Writing to the socket.
    Write,
}

impl ErrorStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Record a frame read from the socket.
pub fn record_frame_received(host: &str, bytes: usize) {
    counter!("stream_client_frames_received_total", "host" => host.to_string()).increment(1);
    counter!("stream_client_bytes_received_total", "host" => host.to_string())
        .increment(u64::try_from(bytes).unwrap_or(u64::MAX));
}

/// Record a frame dropped at the inbound channel.
pub fn record_frame_dropped(host: &str) {
    counter!("stream_client_frames_dropped_total", "host" => host.to_string()).increment(1);
}

/// Record a classified message.
pub fn record_message_classified(format: FrameFormat) {
    counter!(
        "stream_client_messages_classified_total",
        "format" => format.as_str()
    )
    .increment(1);
}

/// Update the connected gauge for a host.
pub fn set_connected(host: &str, connected: bool) {
    gauge!("stream_client_connected", "host" => host.to_string())
        .set(if connected { 1.0 } else { 0.0 });
}

/// Record a connection failure.
pub fn record_connection_error(host: &str, stage: ErrorStage) {
    counter!(
        "stream_client_connection_errors_total",
        "host" => host.to_string(),
        "stage" => stage.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(host: &str) {
    counter!("stream_client_reconnects_total", "host" => host.to_string()).increment(1);
}

/// Record a failed observer callback.
pub fn record_observer_failure(observer: &str) {
    counter!(
        "stream_client_observer_failures_total",
        "observer" => observer.to_string()
    )
    .increment(1);
}

/// Record a forced worker termination.
pub fn record_forced_termination() {
    counter!("stream_client_forced_terminations_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
