//! Retry delays for failed sync attempts.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base * 2^attempt`, capped, with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    /// Fraction of the delay that may be shaved off at random, 0.0 to 1.0.
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic upper bound for the delay after `failures` failures.
    pub fn ceiling(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the next attempt after `failures` failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        if self.jitter == 0.0 {
            return ceiling;
        }
        let shave = rand::thread_rng().gen_range(0.0..=self.jitter);
        ceiling.mul_f64(1.0 - shave)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300)).with_jitter(0.2)
    }
}
