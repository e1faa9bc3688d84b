//! Named breakers, one per protected dependency.
//!
//! # Responsibilities
//! - Hand out the same `Arc<CircuitBreaker>` for every caller of a dependency
//! - Build breakers from the dependency's config section (or the defaults)
//! - Collect snapshots for monitoring
//!
//! # Design Decisions
//! - Breakers are created lazily on first use and never replaced, so a
//!   config reload cannot silently reset live failure counters
//! - Config is swapped atomically; only breakers created afterwards see it

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, GuardConfig};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::resilience::clock::{Clock, MonotonicClock};

/// Registry of breakers keyed by dependency name.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: ArcSwap<GuardConfig>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    /// Create a registry, validating `config` up front.
    pub fn from_config(config: GuardConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        Ok(Self {
            breakers: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            clock,
        })
    }

    /// The breaker for `dependency`, creating it on first use.
    pub fn get_or_create(&self, dependency: &str) -> Result<Arc<CircuitBreaker>, ConfigError> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Ok(Arc::clone(existing.value()));
        }

        let config = self.config.load();
        let breaker = CircuitBreaker::with_clock(
            dependency,
            config.breaker_for(dependency),
            self.clock.clone(),
        )?;

        // Another caller may have raced us here; the entry API keeps theirs.
        let entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency, "Breaker created");
                Arc::new(breaker)
            });
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshots of all breakers, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// The configuration new breakers are built from.
    pub fn config(&self) -> Arc<GuardConfig> {
        self.config.load_full()
    }

    /// Replace the configuration used for breakers created from now on.
    pub fn apply_config(&self, config: GuardConfig) -> Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        self.config.store(Arc::new(config));
        tracing::info!(live_breakers = self.breakers.len(), "Breaker configuration updated");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::resilience::circuit_breaker::BreakerState;

    fn config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.breaker.failure_threshold = 3;
        config.dependencies.insert(
            "payments".into(),
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
        );
        config
    }

    #[test]
    fn test_same_dependency_shares_breaker() {
        let registry = BreakerRegistry::from_config(config()).unwrap();
        let a = registry.get_or_create("inventory").unwrap();
        let b = registry.get_or_create("inventory").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dependency_overrides_apply() {
        let registry = BreakerRegistry::from_config(config()).unwrap();

        let payments = registry.get_or_create("payments").unwrap();
        let _ = payments.execute_blocking(|| Err::<(), _>("declined"));
        assert_eq!(payments.state(), BreakerState::Open);

        let inventory = registry.get_or_create("inventory").unwrap();
        assert_eq!(inventory.snapshot().failure_threshold, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.breaker.failure_threshold = 0;
        assert!(BreakerRegistry::from_config(bad.clone()).is_err());

        let registry = BreakerRegistry::from_config(config()).unwrap();
        assert!(registry.apply_config(bad).is_err());
        assert_eq!(registry.config().breaker.failure_threshold, 3);
    }

    #[test]
    fn test_reload_keeps_live_breakers() {
        let registry = BreakerRegistry::from_config(config()).unwrap();
        let inventory = registry.get_or_create("inventory").unwrap();
        let _ = inventory.execute_blocking(|| Err::<(), _>("timeout"));

        let mut updated = config();
        updated.breaker.failure_threshold = 7;
        registry.apply_config(updated).unwrap();

        let same = registry.get_or_create("inventory").unwrap();
        assert!(Arc::ptr_eq(&inventory, &same));
        assert_eq!(same.snapshot().failure_count, 1);
        assert_eq!(same.snapshot().failure_threshold, 3);

        let fresh = registry.get_or_create("shipping").unwrap();
        assert_eq!(fresh.snapshot().failure_threshold, 7);
    }

    #[test]
    fn test_snapshots_sorted_by_name() {
        let registry = BreakerRegistry::from_config(config()).unwrap();
        for name in ["shipping", "auth", "payments"] {
            registry.get_or_create(name).unwrap();
        }

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["auth", "payments", "shipping"]);
        assert!(registry.get("missing").is_none());
    }
}
