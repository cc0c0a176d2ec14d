//! Capped exponential back-off.

use std::time::Duration;

/// Delay for the `attempt`-th consecutive failure: `base * 2^attempt`,
/// never longer than `max`.
pub fn exponential_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// A retry strategy driven by exponential back-off.
///
/// Each call to [`next`](Self::next) doubles the delay until `max` is
/// reached; [`reset`](Self::reset) starts over at `base`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            max,
        }
    }

    /// The next `Duration` to wait for.
    pub fn next(&mut self) -> Duration {
        let delay = exponential_delay(self.base, self.max, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
