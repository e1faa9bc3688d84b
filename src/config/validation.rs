//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, durations > 0)
//! - Validate the observability surface (log level, metrics address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, and again whenever a
//!   breaker is constructed, so a bad threshold never surfaces at call time

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerConfig, GuardConfig, RetryConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `failure_threshold` must be at least 1.
    #[error("{section}.failure_threshold must be >= 1")]
    ZeroThreshold { section: String },

    /// A duration field that must be positive was zero.
    #[error("{section}.{field} must be greater than zero")]
    ZeroDuration { section: String, field: &'static str },

    /// Retries enabled with no attempts at all.
    #[error("retries.max_attempts must be >= 1")]
    ZeroAttempts,

    /// Backoff base exceeds its own cap.
    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    /// Unknown log level.
    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    LogLevel(String),

    /// Metrics address does not parse as a socket address.
    #[error("observability.metrics_address '{0}' is not a valid socket address")]
    MetricsAddress(String),
}

/// Validate a whole configuration, collecting every violation.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_breaker("breaker", &config.breaker);

    for (name, breaker) in &config.dependencies {
        errors.extend(validate_breaker(&format!("dependencies.{}", name), breaker));
    }

    errors.extend(validate_retries(&config.retries));

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single breaker section; `section` prefixes error messages.
pub fn validate_breaker(section: &str, config: &BreakerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.failure_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold {
            section: section.to_string(),
        });
    }
    if config.timeout_ms == 0 {
        errors.push(ValidationError::ZeroDuration {
            section: section.to_string(),
            field: "timeout_ms",
        });
    }
    if config.retry_timeout_ms == 0 {
        errors.push(ValidationError::ZeroDuration {
            section: section.to_string(),
            field: "retry_timeout_ms",
        });
    }

    errors
}

fn validate_retries(config: &RetryConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !config.enabled {
        return errors;
    }

    if config.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }
    if config.base_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: config.base_delay_ms,
            max: config.max_delay_ms,
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GuardConfig::default();
        config.breaker.failure_threshold = 0;
        config.breaker.retry_timeout_ms = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::ZeroThreshold {
            section: "breaker".into()
        }));
        assert!(errors.contains(&ValidationError::LogLevel("loud".into())));
    }

    #[test]
    fn test_dependency_sections_are_checked() {
        let mut config = GuardConfig::default();
        config.dependencies.insert(
            "payments".into(),
            BreakerConfig {
                failure_threshold: 0,
                ..BreakerConfig::default()
            },
        );

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "dependencies.payments.failure_threshold must be >= 1"
        );
    }

    #[test]
    fn test_disabled_retries_skip_range_checks() {
        let mut config = GuardConfig::default();
        config.retries.enabled = false;
        config.retries.max_attempts = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_metrics_address_only_checked_when_enabled() {
        let mut config = GuardConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MetricsAddress("nowhere".into())]);
    }
}
