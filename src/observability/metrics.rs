//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy, per backend
//! - `lb_backend_selections_total` (counter): selections per backend
//! - `lb_requests_total` (counter): finished proxy sessions by outcome
//! - `lb_probe_failures_total` (counter): failed health probes per backend

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::load_balancer::Backend;

/// Install the Prometheus recorder and its scrape listener.
///
/// Outside a Tokio runtime the exporter runs on its own background thread.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_backend_health(backend: &Backend, healthy: bool) {
    metrics::gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_selection(backend: &Backend) {
    metrics::counter!("lb_backend_selections_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_outcome(outcome: &'static str) {
    metrics::counter!("lb_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_probe_failure(backend: &Backend) {
    metrics::counter!("lb_probe_failures_total", "backend" => backend.to_string()).increment(1);
}
