//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define bridge metrics (submissions, outcomes, latency, sockets)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `bridge_calls_submitted_total` (counter): calls handed to the bridge
//! - `bridge_calls_completed_total` (counter): completions by outcome
//! - `bridge_call_duration_seconds` (histogram): submit → completion, by outcome
//! - `bridge_tracked_sockets` (gauge): sockets currently in the registry
//! - `bridge_inbound_rejected_total` (counter): requests refused before bridging
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The exporter is optional and owns its own listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and start its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_call_submitted() {
    metrics::counter!("bridge_calls_submitted_total").increment(1);
}

pub fn record_call_completed(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("bridge_calls_completed_total", "outcome" => outcome).increment(1);
    metrics::histogram!("bridge_call_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn set_tracked_sockets(count: usize) {
    metrics::gauge!("bridge_tracked_sockets").set(count as f64);
}

pub fn record_inbound_rejected(reason: &'static str) {
    metrics::counter!("bridge_inbound_rejected_total", "reason" => reason).increment(1);
}
