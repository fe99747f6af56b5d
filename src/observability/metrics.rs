//! Metrics collection and exposition.
//!
//! # Metrics
//! - `queue_proxy_requests_total` (counter): proxied requests by method, status
//! - `queue_proxy_request_duration_seconds` (histogram): latency distribution
//! - `queue_proxy_shed_total` (counter): requests shed by the breaker, by reason
//! - `queue_proxy_breaker_{capacity,in_flight,pending}` (gauges)
//! - `queue_proxy_active_requests` (gauge): requests counted by the idle tracker
//! - `queue_proxy_state_transitions_total` (counter): idle/active edges
//! - `queue_proxy_hook_failures_total` (counter): failed pause/resume hooks
//!
//! All recorders are no-ops until `init_metrics` installs an exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::admission::Breaker;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "queue_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("queue_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_shed(reason: &'static str) {
    counter!("queue_proxy_shed_total", "reason" => reason).increment(1);
}

pub fn record_breaker(breaker: &Breaker) {
    gauge!("queue_proxy_breaker_capacity").set(breaker.capacity() as f64);
    gauge!("queue_proxy_breaker_in_flight").set(breaker.in_flight() as f64);
    gauge!("queue_proxy_breaker_pending").set(breaker.pending() as f64);
}

pub fn record_active_requests(active: usize) {
    gauge!("queue_proxy_active_requests").set(active as f64);
}

pub fn record_state_transition(edge: &'static str) {
    counter!("queue_proxy_state_transitions_total", "edge" => edge).increment(1);
}

pub fn record_hook_failure(edge: &'static str) {
    counter!("queue_proxy_hook_failures_total", "edge" => edge).increment(1);
}
