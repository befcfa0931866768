//! Prometheus Metrics Module
//!
//! Records client metrics through the `metrics` facade. Nothing is exported
//! until a recorder is installed; the binary installs the Prometheus
//! exporter with an HTTP listener when a metrics port is configured.
//!
//! # Metrics Categories
//!
//! - **Lifecycle**: attempts, restarts by reason, connection state
//! - **Swarm**: envelopes received by opcode, heartbeats sent
//! - **Dispatch**: handler failures, handlers in flight

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;
use crate::domain::envelope::OpCode;

// =============================================================================
// Exporter
// =============================================================================

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "hiven_client_lifecycle_attempts_total",
        "Stream session attempts started by the supervisor"
    );
    describe_counter!(
        "hiven_client_restarts_total",
        "Stream session restarts by reason"
    );
    describe_gauge!(
        "hiven_client_connection_state",
        "Connection state (0=closed, 1=opening, 2=open, 3=closing)"
    );
    describe_counter!(
        "hiven_client_envelopes_received_total",
        "Envelopes received from the swarm by opcode"
    );
    describe_counter!(
        "hiven_client_heartbeats_sent_total",
        "Heartbeat frames sent to the swarm"
    );
    describe_counter!(
        "hiven_client_handler_failures_total",
        "Event handlers that returned an error or panicked"
    );
    describe_gauge!(
        "hiven_client_handlers_in_flight",
        "Envelopes currently being handled"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Restart reasons used as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The server closed the session cleanly.
    RemoteClose,
    /// Session setup or handshake timed out.
    Timeout,
    /// The handshake frame was malformed or missing.
    Handshake,
    /// An inbound frame could not be decoded.
    Decode,
    /// A heartbeat could not be sent in time.
    KeepAlive,
    /// Transport or task failure.
    Transport,
}

impl RestartReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteClose => "remote_close",
            Self::Timeout => "timeout",
            Self::Handshake => "handshake",
            Self::Decode => "decode",
            Self::KeepAlive => "keep_alive",
            Self::Transport => "transport",
        }
    }
}

/// Record the start of a lifecycle attempt.
pub fn record_lifecycle_attempt() {
    counter!("hiven_client_lifecycle_attempts_total").increment(1);
}

/// Record a session restart.
pub fn record_restart(reason: RestartReason) {
    counter!(
        "hiven_client_restarts_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("hiven_client_connection_state").set(state.as_gauge());
}

/// Record an envelope received from the swarm.
pub fn record_envelope_received(opcode: OpCode) {
    counter!(
        "hiven_client_envelopes_received_total",
        "opcode" => opcode.as_str()
    )
    .increment(1);
}

/// Record a heartbeat frame sent.
pub fn record_heartbeat_sent() {
    counter!("hiven_client_heartbeats_sent_total").increment(1);
}

/// Record a failed or panicked handler.
pub fn record_handler_failure(event: &str) {
    counter!(
        "hiven_client_handler_failures_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Update the number of envelopes being handled.
#[allow(clippy::cast_precision_loss)]
pub fn set_handlers_in_flight(count: usize) {
    gauge!("hiven_client_handlers_in_flight").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
