//! Deadline enforcement for wrapped operations.
//!
//! # Design Decisions
//! - The breaker's own `timeout` is advisory; hard deadlines are opt-in
//! - Uses Tokio's timeout facilities; the operation future is dropped on expiry
//! - Expiry is distinct from the operation's own errors, but the breaker
//!   counts both as failures

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure of an operation run under a deadline.
#[derive(Debug, Error)]
pub enum DeadlineError<E> {
    /// The deadline passed before the operation finished.
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),

    #[error(transparent)]
    Inner(E),
}

impl<E> DeadlineError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, DeadlineError::Elapsed(_))
    }
}

/// Await `operation`, giving up after `deadline`.
pub async fn with_deadline<T, E, Fut>(deadline: Duration, operation: Fut) -> Result<T, DeadlineError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result.map_err(DeadlineError::Inner),
        Err(_) => Err(DeadlineError::Elapsed(deadline)),
    }
}
