//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_rejections_total` (counter): pipeline rejections by reason
//! - `gateway_rate_limited_total` (counter): quota denials by rule
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy, per member
//! - `gateway_config_reloads_total` (counter): reload attempts by result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus scrape endpoint on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejection(reason: &'static str) {
    metrics::counter!("gateway_rejections_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited(rule: &str) {
    metrics::counter!("gateway_rate_limited_total", "rule" => rule.to_string()).increment(1);
}

pub fn record_backend_health(member: &str, healthy: bool) {
    metrics::gauge!("gateway_backend_health", "member" => member.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_config_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("gateway_config_reloads_total", "result" => result).increment(1);
}
