//! Metrics collection and export for Hubbub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use hubbub_core::DispatchReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "hubbub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "hubbub_connections_active";
    pub const FRAMES_TOTAL: &str = "hubbub_frames_total";
    pub const FRAMES_BYTES: &str = "hubbub_frames_bytes";
    pub const ROOMS_ACTIVE: &str = "hubbub_rooms_active";
    pub const JOINS_TOTAL: &str = "hubbub_joins_total";
    pub const DISPATCHES_TOTAL: &str = "hubbub_dispatches_total";
    pub const DELIVERIES_TOTAL: &str = "hubbub_deliveries_total";
    pub const DROPPED_TOTAL: &str = "hubbub_dropped_total";
    pub const FORCED_DISCONNECTS_TOTAL: &str = "hubbub_forced_disconnects_total";
    pub const DISPATCH_SECONDS: &str = "hubbub_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "hubbub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total frame bytes by direction");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of room joins");
    metrics::describe_counter!(
        names::DISPATCHES_TOTAL,
        "Total number of routed events by kind"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Events accepted into subscriber buffers"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Events dropped because a subscriber buffer was full"
    );
    metrics::describe_counter!(
        names::FORCED_DISCONNECTS_TOTAL,
        "Connections closed because they could not keep up"
    );
    metrics::describe_histogram!(names::DISPATCH_SECONDS, "Event routing latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors by type");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame crossing the socket.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a room join.
pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
}

/// Record the outcome of routing one event.
pub fn record_dispatch(kind: &'static str, report: &DispatchReport, seconds: f64) {
    counter!(names::DISPATCHES_TOTAL, "kind" => kind).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
    if report.dropped > 0 {
        counter!(names::DROPPED_TOTAL).increment(report.dropped as u64);
    }
    if !report.disconnected.is_empty() {
        counter!(names::FORCED_DISCONNECTS_TOTAL).increment(report.disconnected.len() as u64);
    }
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
