//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::GatewayState;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record an operation applied to a room.
pub fn record_operation(kind: &'static str) {
    metrics::counter!("room_operations_total", "kind" => kind).increment(1);
}

/// Record a rejected client message.
pub fn record_rejection(kind: &'static str) {
    metrics::counter!("rejected_messages_total", "kind" => kind).increment(1);
}

/// Refresh the values owned by the room engine just before a scrape.
pub fn record_engine_snapshot(state: &GatewayState) {
    metrics::gauge!("rooms_active").set(state.registry.len() as f64);
    metrics::counter!("presence_evictions_total").absolute(state.presence.evicted_total());
    metrics::counter!("rooms_reclaimed_total").absolute(state.collector.reclaimed_total());
}
