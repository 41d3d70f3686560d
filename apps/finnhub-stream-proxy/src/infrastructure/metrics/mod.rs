//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: messages received by kind, commands sent, reconnects
//! - **Fan-out**: trade events delivered and dropped
//! - **Clients**: connected clients, commands received
//! - **Subscriptions**: active upstream symbols
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{CommandAction, ConnectionState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Later calls return the handle installed by the first one.
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
    describe_counter!(
        "finnhub_proxy_upstream_messages_total",
        "Messages received from the upstream feed by kind"
    );
    describe_counter!(
        "finnhub_proxy_upstream_commands_total",
        "Subscribe and unsubscribe commands written upstream"
    );
    describe_counter!(
        "finnhub_proxy_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "finnhub_proxy_upstream_connected",
        "1 when the upstream link is connected, 0 otherwise"
    );

    describe_counter!(
        "finnhub_proxy_trades_delivered_total",
        "Trade events queued to clients"
    );
    describe_counter!(
        "finnhub_proxy_trades_dropped_total",
        "Trade events dropped by reason"
    );

    describe_gauge!("finnhub_proxy_clients", "Connected downstream clients");
    describe_counter!(
        "finnhub_proxy_client_commands_total",
        "Commands received from clients by kind"
    );
    describe_gauge!(
        "finnhub_proxy_active_symbols",
        "Symbols with at least one interested client"
    );

    describe_histogram!(
        "finnhub_proxy_fanout_seconds",
        "Time to route one upstream message to client queues"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a trade event did not reach a client queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The client's queue was full.
    QueueFull,
    /// The client's queue was closed.
    ClientGone,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::ClientGone => "client_gone",
        }
    }
}

const fn action_label(action: CommandAction) -> &'static str {
    match action {
        CommandAction::Subscribe => "subscribe",
        CommandAction::Unsubscribe => "unsubscribe",
    }
}

/// Record a message received upstream.
pub fn record_upstream_message(kind: &'static str) {
    counter!("finnhub_proxy_upstream_messages_total", "kind" => kind).increment(1);
}

/// Record a command written upstream.
pub fn record_upstream_command(action: CommandAction) {
    counter!("finnhub_proxy_upstream_commands_total", "action" => action_label(action))
        .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("finnhub_proxy_reconnects_total").increment(1);
}

/// Update the link connection gauge.
pub fn set_link_state(state: ConnectionState) {
    let value = if state == ConnectionState::Connected {
        1.0
    } else {
        0.0
    };
    gauge!("finnhub_proxy_upstream_connected").set(value);
}

/// Record trade events queued to clients.
pub fn record_trades_delivered(count: u64) {
    counter!("finnhub_proxy_trades_delivered_total").increment(count);
}

/// Record trade events that were dropped.
pub fn record_trades_dropped(reason: DropReason, count: u64) {
    counter!("finnhub_proxy_trades_dropped_total", "reason" => reason.as_str()).increment(count);
}

/// Update the connected client gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("finnhub_proxy_clients").set(count as f64);
}

/// Record a command received from a client.
pub fn record_client_command(kind: &'static str) {
    counter!("finnhub_proxy_client_commands_total", "kind" => kind).increment(1);
}

/// Update the active symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_symbols(count: usize) {
    gauge!("finnhub_proxy_active_symbols").set(count as f64);
}

/// Record how long one fan-out pass took.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("finnhub_proxy_fanout_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
