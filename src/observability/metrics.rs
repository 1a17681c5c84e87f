//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, destination
//! - `gateway_request_duration_seconds` (histogram): dispatch latency
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_backend_alive` (gauge): 1 = alive, 0 = down, per destination
//! - `gateway_tcp_connections_total` (counter): routed TCP streams by outcome
//!
//! Recording is a no-op until a recorder is installed, so every subsystem
//! records unconditionally and `init_metrics` decides whether it is exported.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, dest: &str, start: Instant) {
    ::metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "dest" => dest.to_string(),
    )
    .increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    ::metrics::counter!("gateway_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_backend_health(dest: &str, alive: bool) {
    ::metrics::gauge!("gateway_backend_alive", "dest" => dest.to_string())
        .set(if alive { 1.0 } else { 0.0 });
}

pub fn record_tcp_connection(outcome: &'static str) {
    ::metrics::counter!("gateway_tcp_connections_total", "outcome" => outcome).increment(1);
}
