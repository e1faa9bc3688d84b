//! Error taxonomy for guarded calls.
//!
//! A guarded call either never ran (`Rejected`) or ran and failed
//! (`Operation`). Callers branch on the two: back off on the first, handle
//! or alert on the second.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::circuit_breaker::BreakerState;

/// The breaker refused to run the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is {state}; retry after {retry_after:?}")]
pub struct BreakerOpenError {
    /// Name of the breaker that rejected the call.
    pub breaker: String,
    /// State observed when the call was rejected.
    pub state: BreakerState,
    /// Remaining cool-down. Zero while a half-open probe is in flight.
    pub retry_after: Duration,
}

/// Result of a call made through a breaker.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// Rejected without running the operation.
    #[error(transparent)]
    Rejected(#[from] BreakerOpenError),

    /// The operation ran and failed; the original error is untouched.
    #[error(transparent)]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, GuardError::Rejected(_))
    }

    /// Remaining cool-down for a rejection, `None` for operation failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::Rejected(e) => Some(e.retry_after),
            GuardError::Operation(_) => None,
        }
    }

    /// The operation's own error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::Operation(e) => Some(e),
            GuardError::Rejected(_) => None,
        }
    }

    pub fn map_operation<F, O>(self, f: O) -> GuardError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            GuardError::Rejected(e) => GuardError::Rejected(e),
            GuardError::Operation(e) => GuardError::Operation(f(e)),
        }
    }
}
