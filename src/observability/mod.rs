//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every breaker decision and outcome produces:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → BreakerSnapshot for dashboards (resilience::circuit_breaker)
//! ```
//!
//! # Design Decisions
//! - Instrumentation is advisory; it never feeds back into breaker state
//! - Emission happens after the breaker lock is released and may lag

pub mod logging;
pub mod metrics;
