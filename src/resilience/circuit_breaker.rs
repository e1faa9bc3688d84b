//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a single probe call is testing whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt (that call is the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails, regardless of threshold
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency, shared by reference (`Arc`), never cloned
//! - All state lives behind one mutex; the lock is never held while the
//!   wrapped operation runs
//! - Admission and the Open → Half-Open transition happen in the same
//!   critical section, so only one caller can become the probe
//! - Every transition bumps a generation; outcomes from calls admitted
//!   under an older generation are recorded but never move the state
//! - A permit dropped without an outcome counts as a failure, so a
//!   cancelled probe cannot leave the breaker stuck in Half-Open

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::validation::validate_breaker;
use crate::config::{BreakerConfig, ConfigError};
use crate::observability::metrics::{self, CallOutcome};
use crate::resilience::clock::{Clock, MonotonicClock};
use crate::resilience::error::{BreakerOpenError, GuardError};
use crate::resilience::timeouts::{with_deadline, DeadlineError};

/// Breaker operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker for dashboards and health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub retry_timeout: Duration,
    /// `None` if no failure has been observed yet.
    pub time_since_last_failure: Option<Duration>,
    /// `None` unless Open. Zero once the cool-down has elapsed but no call
    /// has arrived to perform the Half-Open transition.
    pub time_until_next_attempt: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, to: BreakerState) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        Transition { from, to }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: BreakerState,
    to: BreakerState,
}

/// A thread-safe circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    retry_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker on the process monotonic clock.
    ///
    /// Fails if `config` is invalid (e.g. `failure_threshold == 0`).
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, Arc::new(MonotonicClock))
    }

    /// Create a breaker reading time from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        config: &BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let errors = validate_breaker(&name, config);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        metrics::record_state(&name, BreakerState::Closed);

        Ok(Self {
            name,
            failure_threshold: config.failure_threshold,
            timeout: config.timeout(),
            retry_timeout: config.retry_timeout(),
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                next_attempt: None,
                probe_in_flight: false,
                generation: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advisory per-call budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No user code runs under the lock, so a poisoned guard still holds
        // consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, without performing any pending transition.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Read-only view of the breaker. Never changes state or counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let now = self.clock.now();

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            timeout: self.timeout,
            retry_timeout: self.retry_timeout,
            time_since_last_failure: inner.last_failure.map(|t| now.saturating_duration_since(t)),
            time_until_next_attempt: match inner.state {
                BreakerState::Open => inner.next_attempt.map(|t| t.saturating_duration_since(now)),
                _ => None,
            },
        }
    }

    /// Decide whether a call may run.
    ///
    /// On success the returned permit must be settled with
    /// [`CallPermit::success`] or [`CallPermit::failure`]; dropping it
    /// unsettled records a failure.
    pub fn try_acquire(&self, label: &str) -> Result<CallPermit<'_>, BreakerOpenError> {
        let now = self.clock.now();
        let mut transition = None;

        let decision = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                BreakerState::Closed => Ok((inner.generation, false)),
                BreakerState::Open => {
                    let next_attempt = inner.next_attempt.unwrap_or(now);
                    if now < next_attempt {
                        Err((BreakerState::Open, next_attempt - now))
                    } else {
                        transition = Some(inner.transition(BreakerState::HalfOpen));
                        inner.probe_in_flight = true;
                        Ok((inner.generation, true))
                    }
                }
                BreakerState::HalfOpen if inner.probe_in_flight => {
                    Err((BreakerState::HalfOpen, Duration::ZERO))
                }
                BreakerState::HalfOpen => {
                    inner.probe_in_flight = true;
                    Ok((inner.generation, true))
                }
            }
        };

        if let Some(t) = transition {
            self.report_transition(t);
        }

        match decision {
            Ok((generation, probe)) => {
                tracing::debug!(breaker = %self.name, call = label, probe, "Call admitted");
                Ok(CallPermit {
                    breaker: self,
                    label: label.to_string(),
                    generation,
                    probe,
                    started: now,
                    settled: false,
                })
            }
            Err((state, retry_after)) => {
                tracing::warn!(
                    breaker = %self.name,
                    call = label,
                    state = %state,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Call rejected"
                );
                metrics::record_call(&self.name, CallOutcome::Rejected);
                Err(BreakerOpenError {
                    breaker: self.name.clone(),
                    state,
                    retry_after,
                })
            }
        }
    }

    /// Run `op` through the breaker, labelled with the breaker name.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_named(&self.name, op).await
    }

    /// Run `op` through the breaker. `label` is only used for diagnostics.
    ///
    /// The operation runs at most once. Its error is returned unchanged in
    /// [`GuardError::Operation`]; calls refused by the breaker return
    /// [`GuardError::Rejected`] without running `op`.
    pub async fn execute_named<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire(label)?;

        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(GuardError::Operation(e))
            }
        }
    }

    /// Blocking counterpart of [`CircuitBreaker::execute`].
    pub fn execute_blocking<T, E, F>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.execute_blocking_named(&self.name, op)
    }

    pub fn execute_blocking_named<T, E, F>(&self, label: &str, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire(label)?;

        match op() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(GuardError::Operation(e))
            }
        }
    }

    /// Like [`CircuitBreaker::execute`], but cancels `op` once the
    /// configured timeout elapses and counts that as a failure.
    pub async fn execute_with_deadline<T, E, F, Fut>(
        &self,
        op: F,
    ) -> Result<T, GuardError<DeadlineError<E>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let timeout = self.timeout;
        self.execute(|| with_deadline(timeout, op())).await
    }

    fn settle(&self, permit: &CallPermit<'_>, succeeded: bool) {
        let now = self.clock.now();
        let mut transition = None;

        let (failure_count, stale) = {
            let mut inner = self.lock();
            if !succeeded {
                inner.last_failure = Some(now);
            }

            let stale = inner.generation != permit.generation;
            if !stale {
                match (inner.state, succeeded) {
                    (BreakerState::Closed, true) => inner.failure_count = 0,
                    (BreakerState::Closed, false) => {
                        inner.failure_count = inner.failure_count.saturating_add(1);
                        if inner.failure_count >= self.failure_threshold {
                            inner.next_attempt = Some(now + self.retry_timeout);
                            transition = Some(inner.transition(BreakerState::Open));
                        }
                    }
                    (BreakerState::HalfOpen, true) => {
                        inner.probe_in_flight = false;
                        inner.failure_count = 0;
                        inner.next_attempt = None;
                        transition = Some(inner.transition(BreakerState::Closed));
                    }
                    (BreakerState::HalfOpen, false) => {
                        inner.probe_in_flight = false;
                        inner.failure_count = inner.failure_count.saturating_add(1);
                        inner.next_attempt = Some(now + self.retry_timeout);
                        transition = Some(inner.transition(BreakerState::Open));
                    }
                    // Entering Open bumps the generation, so a current
                    // permit never observes it.
                    (BreakerState::Open, _) => {}
                }
            }

            (inner.failure_count, stale)
        };

        let elapsed = now.saturating_duration_since(permit.started);
        metrics::record_call_duration(&self.name, elapsed);
        metrics::record_call(
            &self.name,
            if succeeded {
                CallOutcome::Success
            } else {
                CallOutcome::Failure
            },
        );
        if elapsed > self.timeout {
            tracing::warn!(
                breaker = %self.name,
                call = %permit.label,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Call exceeded advisory timeout"
            );
            metrics::record_timeout_exceeded(&self.name);
        }

        tracing::debug!(
            breaker = %self.name,
            call = %permit.label,
            succeeded,
            probe = permit.probe,
            stale,
            failure_count,
            "Call finished"
        );

        if let Some(t) = transition {
            self.report_transition(t);
        }
    }

    fn report_transition(&self, t: Transition) {
        match t.to {
            BreakerState::Open => tracing::warn!(
                breaker = %self.name,
                from = %t.from,
                retry_timeout_ms = self.retry_timeout.as_millis() as u64,
                "Circuit opened"
            ),
            BreakerState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit half-open, probing")
            }
            BreakerState::Closed => tracing::info!(breaker = %self.name, "Circuit closed"),
        }
        metrics::record_transition(&self.name, t.from, t.to);
    }
}

/// Admission ticket for a single call.
///
/// Settling consumes the permit. An unsettled permit records a failure when
/// dropped.
#[derive(Debug)]
#[must_use = "an unsettled permit records a failure when dropped"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    label: String,
    generation: u64,
    probe: bool,
    started: Instant,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(&self, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(&self, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                breaker = %self.breaker.name,
                call = %self.label,
                "Permit dropped without outcome, counting as failure"
            );
            self.breaker.settle(self, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;

    fn breaker(threshold: u32, retry_timeout_ms: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let config = BreakerConfig {
            failure_threshold: threshold,
            timeout_ms: 1_000,
            retry_timeout_ms,
        };
        let cb = CircuitBreaker::with_clock("test", &config, Arc::new(clock.clone())).unwrap();
        (cb, clock)
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), GuardError<&'static str>> {
        cb.execute_blocking(|| Err("boom"))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<(), GuardError<&'static str>> {
        cb.execute_blocking(|| Ok(()))
    }

    #[test]
    fn test_zero_threshold_rejected_at_construction() {
        let config = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        let err = CircuitBreaker::new("bad", &config).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_closed_allows_calls() {
        let (cb, _) = breaker(3, 10_000);
        assert_eq!(cb.execute_blocking(|| Ok::<_, ()>(7)).unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let (cb, _) = breaker(3, 10_000);
        for _ in 0..2 {
            assert!(matches!(fail(&cb), Err(GuardError::Operation("boom"))));
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().failure_count, 2);
        assert!(succeed(&cb).is_ok());
    }

    #[test]
    fn test_opens_at_threshold() {
        let (cb, clock) = breaker(3, 10_000);
        for _ in 0..3 {
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Open);

        clock.advance(Duration::from_secs(4));
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.time_until_next_attempt, Some(Duration::from_secs(6)));
        assert_eq!(snapshot.time_since_last_failure, Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _) = breaker(3, 10_000);
        let _ = fail(&cb);
        let _ = fail(&cb);
        let _ = succeed(&cb);
        assert_eq!(cb.snapshot().failure_count, 0);

        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_open_rejects_without_running() {
        let (cb, clock) = breaker(1, 10_000);
        let _ = fail(&cb);

        clock.advance(Duration::from_secs(3));
        let mut ran = false;
        let err = cb
            .execute_blocking(|| {
                ran = true;
                Ok::<_, ()>(())
            })
            .unwrap_err();

        assert!(!ran);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_expired_cooldown_admits_probe() {
        let (cb, clock) = breaker(1, 10_000);
        let _ = fail(&cb);
        clock.advance(Duration::from_secs(10));

        let permit = cb.try_acquire("probe").unwrap();
        assert!(permit.is_probe());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let second = cb.try_acquire("second").unwrap_err();
        assert_eq!(second.state, BreakerState::HalfOpen);
        assert_eq!(second.retry_after, Duration::ZERO);

        permit.success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_regardless_of_threshold() {
        let (cb, clock) = breaker(5, 10_000);
        for _ in 0..5 {
            let _ = fail(&cb);
        }
        clock.advance(Duration::from_secs(10));

        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(
            cb.snapshot().time_until_next_attempt,
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_dropped_probe_counts_as_failure() {
        let (cb, clock) = breaker(1, 10_000);
        let _ = fail(&cb);
        clock.advance(Duration::from_secs(10));

        drop(cb.try_acquire("cancelled").unwrap());
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_stale_outcomes_do_not_move_state() {
        let (cb, clock) = breaker(1, 10_000);

        let slow = cb.try_acquire("slow").unwrap();
        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);

        clock.advance(Duration::from_secs(2));
        slow.failure();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.time_until_next_attempt, Some(Duration::from_secs(8)));
        assert_eq!(snapshot.time_since_last_failure, Some(Duration::ZERO));
    }

    #[test]
    fn test_snapshot_does_not_transition() {
        let (cb, clock) = breaker(1, 10_000);
        let _ = fail(&cb);
        clock.advance(Duration::from_secs(30));

        for _ in 0..3 {
            let snapshot = cb.snapshot();
            assert_eq!(snapshot.state, BreakerState::Open);
            assert_eq!(snapshot.time_until_next_attempt, Some(Duration::ZERO));
            assert_eq!(snapshot.failure_count, 1);
        }
    }

    #[test]
    fn test_timeout_overrun_is_advisory() {
        let (cb, clock) = breaker(1, 10_000);

        let result = cb.execute_blocking(|| {
            clock.advance(cb.timeout() * 3);
            Ok::<_, ()>("late")
        });

        assert_eq!(result.unwrap(), "late");
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.time_since_last_failure, None);
    }

    #[tokio::test]
    async fn test_async_overrun_runs_to_completion() {
        let (cb, clock) = breaker(1, 10_000);

        let result = cb
            .execute(|| async {
                clock.advance(Duration::from_secs(2));
                tokio::task::yield_now().await;
                Ok::<_, ()>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_async_execute_propagates_error() {
        let (cb, _) = breaker(2, 10_000);
        let result: Result<u8, _> = cb.execute(|| async { Err("down") }).await;
        assert!(matches!(result, Err(GuardError::Operation("down"))));
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_execute_with_deadline_counts_expiry() {
        let config = BreakerConfig {
            failure_threshold: 1,
            timeout_ms: 20,
            retry_timeout_ms: 10_000,
        };
        let cb = CircuitBreaker::new("slow", &config).unwrap();

        let result = cb
            .execute_with_deadline(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ()>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(GuardError::Operation(DeadlineError::Elapsed(_)))
        ));
        assert_eq!(cb.state(), BreakerState::Open);
    }
}
