use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a ceiling.
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at `ceiling`.
/// Without jitter the policy is a pure function of the attempt number.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    max_attempts: NonZeroU32,
    jitter: f64,
}

impl Backoff {
    /// Default ceiling on a single delay.
    pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);

    /// Creates a policy starting at `base` that allows `max_attempts` invocations in total.
    pub fn new(base: Duration, max_attempts: NonZeroU32) -> Self {
        Self {
            base,
            ceiling: Self::DEFAULT_CEILING,
            max_attempts,
            jitter: 0.0,
        }
    }

    /// Caps every computed delay at `ceiling`.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Adds a uniform random `[0, fraction * delay)` on top of each delay.
    ///
    /// `fraction` is clamped to `[0, 1]`; NaN disables jitter. The jitter only ever
    /// adds time, so the expected delay stays non-decreasing in the attempt number.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self
    }

    /// Total number of invocations allowed, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Whether a transient failure on `attempt` may be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.get()
    }

    /// The deterministic delay to wait after a failure on `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }

    /// The delay to wait after a failure on `attempt`, jitter included.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..self.jitter);
        delay + delay.mul_f64(extra)
    }
}
