//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dev_proxy_requests_total` (counter): requests by method, status, target
//! - `dev_proxy_request_duration_seconds` (histogram): dispatch latency by target
//! - `dev_proxy_rule_reloads_total` (counter): rule set reloads
//!
//! Recording is a no-op until a recorder is installed, so tests and
//! metrics-disabled runs pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Serve Prometheus metrics on `addr`. Requires a running Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one dispatched request.
pub fn record_dispatch(method: &str, status: u16, target: &'static str, started: Instant) {
    counter!(
        "dev_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "target" => target
    )
    .increment(1);
    histogram!("dev_proxy_request_duration_seconds", "target" => target).record(started.elapsed().as_secs_f64());
}

pub fn record_rule_reload() {
    counter!("dev_proxy_rule_reloads_total").increment(1);
}
