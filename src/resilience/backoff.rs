//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule: `base * 2^(attempt - 1)`, capped at `max`,
/// plus up to 10% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.ceiling(attempt);

        let jitter_range = capped.as_millis() as u64 / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        capped + Duration::from_millis(jitter)
    }

    /// Delay for `attempt` without jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}
