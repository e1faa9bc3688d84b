//! Circuit breaker guard for calls to unreliable dependencies.

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::schema::GuardConfig;
pub use resilience::{BreakerOpenError, BreakerRegistry, BreakerState, CircuitBreaker, GuardError};
