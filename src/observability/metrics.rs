//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_rejections_total` (counter): rejections by kind
//! - `guard_validations_total` (counter): verdicts by threat level
//! - `guard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open, per dependency
//! - `guard_key_events_total` (counter): key lifecycle transitions
//! - `guard_inflight_operations` (gauge): admitted operations in flight
//! - `guard_operation_duration_seconds` (histogram): protected call latency
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality (never principal ids)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerState;

/// Install the Prometheus exporter on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rejection(kind: &'static str) {
    counter!("guard_rejections_total", "kind" => kind).increment(1);
}

pub fn record_validation(level: &'static str) {
    counter!("guard_validations_total", "level" => level).increment(1);
}

pub fn record_circuit_state(dependency: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    gauge!("guard_circuit_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_key_event(event: &'static str) {
    counter!("guard_key_events_total", "event" => event).increment(1);
}

pub fn record_inflight(count: usize) {
    gauge!("guard_inflight_operations").set(count as f64);
}

pub fn record_operation(dependency: &str, outcome: &'static str, start: Instant) {
    histogram!(
        "guard_operation_duration_seconds",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}
