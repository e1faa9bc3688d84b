//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → registry.rs (look up the dependency's shared breaker)
//!     → retries.rs (optional; re-run operation failures with backoff.rs)
//!     → circuit_breaker.rs (admit, reject or probe; record the outcome)
//!     → timeouts.rs (optional; hard deadline on the wrapped operation)
//! ```
//!
//! # Design Decisions
//! - The breaker never retries and never hides the operation's error
//! - Rejections are a separate error kind carrying the remaining cool-down
//! - Timeouts are advisory unless the caller opts into a deadline
//! - Time comes from a `Clock` so transitions are testable without sleeping

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CallPermit, CircuitBreaker};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{BreakerOpenError, GuardError};
pub use registry::BreakerRegistry;
pub use retries::{retry, RetryPolicy};
pub use timeouts::{with_deadline, DeadlineError};
