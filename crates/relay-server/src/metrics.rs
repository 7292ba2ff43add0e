//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// `WebSocket` sessions opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// `WebSocket` sessions closed total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused because of capacity or shutdown (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Inbound frames routed (counter, labels: kind).
pub const WS_MESSAGES_RECEIVED_TOTAL: &str = "ws_messages_received_total";
/// Inbound frames answered with an `error` envelope (counter).
pub const WS_PROTOCOL_ERRORS_TOTAL: &str = "ws_protocol_errors_total";
/// Outbound frames dropped on a full queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Sessions evicted by the heartbeat (counter).
pub const WS_HEARTBEAT_EVICTIONS_TOTAL: &str = "ws_heartbeat_evictions_total";
/// Rooms with at least one member (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
/// Joins that added a member (counter).
pub const ROOM_JOINS_TOTAL: &str = "room_joins_total";
/// Leaves that removed a member (counter).
pub const ROOM_LEAVES_TOTAL: &str = "room_leaves_total";
/// Snapshot writes that succeeded (counter).
pub const SNAPSHOT_SAVES_TOTAL: &str = "snapshot_saves_total";
/// Snapshot writes that failed (counter).
pub const SNAPSHOT_FAILURES_TOTAL: &str = "snapshot_failures_total";
/// Data-change notifications fanned out (counter, labels: action).
pub const DATA_CHANGES_TOTAL: &str = "data_changes_total";
