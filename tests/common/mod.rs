//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use circuit_guard::config::BreakerConfig;
use circuit_guard::resilience::{CircuitBreaker, GuardError, ManualClock};
use thiserror::Error;

/// Error returned by stub dependencies.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("dependency unavailable")]
pub struct Unavailable;

/// Build a breaker on a manual clock.
pub fn manual_breaker(
    threshold: u32,
    retry_timeout: Duration,
) -> (Arc<CircuitBreaker>, ManualClock) {
    let clock = ManualClock::new();
    let config = BreakerConfig {
        failure_threshold: threshold,
        timeout_ms: 10_000,
        retry_timeout_ms: retry_timeout.as_millis() as u64,
    };
    let breaker = CircuitBreaker::with_clock("dependency", &config, Arc::new(clock.clone()))
        .expect("valid breaker config");
    (Arc::new(breaker), clock)
}

/// A stub dependency that counts how often it is actually invoked.
#[derive(Debug, Default)]
pub struct StubDependency {
    calls: AtomicU32,
}

#[allow(dead_code)]
impl StubDependency {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, breaker: &CircuitBreaker) -> Result<(), GuardError<Unavailable>> {
        breaker.execute_blocking(|| {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Unavailable)
        })
    }

    pub fn succeed(&self, breaker: &CircuitBreaker) -> Result<u32, GuardError<Unavailable>> {
        breaker.execute_blocking(|| Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1))
    }
}
