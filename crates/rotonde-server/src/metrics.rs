//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "rotonde_connections_total";
/// Connections torn down (counter).
pub const DISCONNECTIONS_TOTAL: &str = "rotonde_disconnections_total";
/// Upgrades refused at the connection limit (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rotonde_connections_rejected_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "rotonde_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "rotonde_connection_duration_seconds";
/// Inbound envelopes (counter, labels: type).
pub const ENVELOPES_RECEIVED_TOTAL: &str = "rotonde_envelopes_received_total";
/// Frames queued to recipients (counter, labels: type).
pub const ENVELOPES_DELIVERED_TOTAL: &str = "rotonde_envelopes_delivered_total";
/// Errors reported to senders (counter, labels: code).
pub const ROUTING_ERRORS_TOTAL: &str = "rotonde_routing_errors_total";
/// Connections closed because their send queue filled up (counter).
pub const SEND_QUEUE_OVERFLOWS_TOTAL: &str = "rotonde_send_queue_overflows_total";
/// Registered definitions (gauge).
pub const DEFINITIONS_ACTIVE: &str = "rotonde_definitions_active";
/// Subscription pairs (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "rotonde_subscriptions_active";
/// Connections closed for missing pongs (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "rotonde_heartbeat_timeouts_total";
