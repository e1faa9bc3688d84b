//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_calls_total` (counter): calls by breaker, outcome (success, failure, rejected)
//! - `guard_state_transitions_total` (counter): transitions by breaker, from, to
//! - `guard_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `guard_call_duration_seconds` (histogram): wrapped operation latency
//! - `guard_timeout_exceeded_total` (counter): calls that overran the advisory timeout
//!
//! # Design Decisions
//! - Recording is best-effort and happens outside the breaker lock
//! - Without an installed recorder every call here is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::BreakerState;

/// Outcome label for `guard_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Rejected,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_call(breaker: &str, outcome: CallOutcome) {
    counter!(
        "guard_calls_total",
        "breaker" => breaker.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_call_duration(breaker: &str, elapsed: Duration) {
    histogram!("guard_call_duration_seconds", "breaker" => breaker.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_timeout_exceeded(breaker: &str) {
    counter!("guard_timeout_exceeded_total", "breaker" => breaker.to_string()).increment(1);
}

/// Record a state transition and update the state gauge.
pub fn record_transition(breaker: &str, from: BreakerState, to: BreakerState) {
    counter!(
        "guard_state_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_state(breaker, to);
}

pub fn record_state(breaker: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    gauge!("guard_breaker_state", "breaker" => breaker.to_string()).set(value);
}
