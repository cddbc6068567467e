//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): rate limit decisions by outcome
//! - `guard_proxy_detected_total` (counter): switches to `X-Forwarded-For` trust
//! - `guard_buckets_purged_total` (counter): idle client buckets dropped
//! - `guard_tracked_clients` (gauge): client buckets held in memory
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use ::metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(outcome: &'static str) {
    counter!("guard_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_proxy_detected() {
    counter!("guard_proxy_detected_total").increment(1);
}

pub fn record_buckets_purged(count: usize) {
    counter!("guard_buckets_purged_total").increment(count as u64);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("guard_tracked_clients").set(count as f64);
}
