//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_selections_total` (counter): selections by pool, outcome
//! - `balancer_fallbacks_total` (counter): fallbacks by pool, outcome
//! - `balancer_backend_load` (gauge): in-flight sessions per backend
//! - `balancer_backend_state` (gauge): 0=alive, 1=overloaded, 2=down, 3=down-retry
//! - `balancer_backlog_depth` (gauge): queued requests per pool

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use crate::health::BackendState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_selection(pool: &str, outcome: &'static str) {
    metrics::counter!(
        "balancer_selections_total",
        "pool" => pool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_fallback(pool: &str, outcome: &'static str) {
    metrics::counter!(
        "balancer_fallbacks_total",
        "pool" => pool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_backend_load(pool: &str, backend: &str, load: usize) {
    metrics::gauge!(
        "balancer_backend_load",
        "pool" => pool.to_string(),
        "backend" => backend.to_string()
    )
    .set(load as f64);
}

pub fn record_backend_state(pool: &str, backend: &str, state: BackendState) {
    metrics::gauge!(
        "balancer_backend_state",
        "pool" => pool.to_string(),
        "backend" => backend.to_string()
    )
    .set(state as u8 as f64);
}

pub fn record_backlog_depth(pool: &str, depth: usize) {
    metrics::gauge!("balancer_backlog_depth", "pool" => pool.to_string()).set(depth as f64);
}
