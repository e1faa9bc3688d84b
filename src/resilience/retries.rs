//! Retry logic layered over a circuit breaker.
//!
//! # Responsibilities
//! - Re-run failed operations with exponential backoff + jitter
//! - Route every attempt through the breaker so each failure is counted
//!
//! # Design Decisions
//! - The breaker itself never retries; this is an outer layer
//! - A breaker rejection ends the loop at once, never waits it out
//! - Callers only wrap idempotent operations

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::GuardError;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Backoff::new(Duration::ZERO, Duration::ZERO))
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        if !config.enabled {
            return Self::none();
        }
        Self::new(
            config.max_attempts,
            Backoff::new(
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
        )
    }
}

/// Run `op` through `breaker`, retrying operation failures per `policy`.
///
/// Returns the last operation error once attempts are exhausted, or the
/// breaker's rejection as soon as it refuses a call.
pub async fn retry<T, E, F, Fut>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, GuardError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match breaker.execute(&mut op).await {
            Ok(value) => return Ok(value),
            Err(GuardError::Rejected(rejection)) => {
                tracing::debug!(
                    breaker = breaker.name(),
                    attempt,
                    "Breaker rejected attempt, giving up"
                );
                return Err(GuardError::Rejected(rejection));
            }
            Err(GuardError::Operation(_)) if attempt < policy.max_attempts => {
                let delay = policy.backoff.delay(attempt);
                tracing::info!(breaker = breaker.name(), attempt, delay = ?delay, "Retrying operation");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
