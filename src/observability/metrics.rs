//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): gated API requests by method, status
//! - `guard_request_duration_seconds` (histogram): API latency
//! - `guard_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `guard_breaker_transitions_total` (counter): by breaker, from, to
//! - `guard_breaker_rejections_total` (counter): fail-fast rejections
//! - `guard_retries_total` (counter): retries by policy
//! - `guard_rate_limited_total` (counter): 429s by policy
//! - `guard_rate_limit_degraded_total` (counter): checks served by the local counter

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    counter!("guard_requests_total", &labels).increment(1);
    histogram!("guard_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_state(breaker: &str, state: CircuitState) {
    gauge!("guard_breaker_state", "breaker" => breaker.to_string()).set(state as u8 as f64);
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "guard_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("guard_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_retry(policy: &str) {
    counter!("guard_retries_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_rate_limited(policy: &str) {
    counter!("guard_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_rate_limit_degraded(policy: &str) {
    counter!("guard_rate_limit_degraded_total", "policy" => policy.to_string()).increment(1);
}
