//! Exponential backoff used by the retry strategy.

use std::time::Duration;

/// `delay(attempt) = min(max_delay, base * 2^(attempt-1))`, 1-indexed attempts.
///
/// `max_delay` is mandatory: an unbounded exponential schedule is never the right
/// default for outbound calls to a third party.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 2u32.saturating_pow(exponent);
        let exp_delay =
            self.base.checked_mul(multiplier).unwrap_or(Duration::from_secs(u64::MAX));
        exp_delay.min(self.max_delay)
    }
}
