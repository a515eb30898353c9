//! Retry backoff policy for reconnect attempts.
//!
//! Exponential with jitter, retained across state transitions and reset to
//! zero when a client reaches `Ready`. `Error` never retries by itself; the
//! delay here only spaces out event-driven retries.

use std::time::Duration;

use rand::Rng;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const FACTOR: u32 = 2;
/// Jitter multiplier range applied to the computed delay.
const JITTER_LOW: f64 = 0.5;
const JITTER_HIGH: f64 = 1.5;

#[derive(Debug, Default, Clone)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and return the delay to wait before the next
    /// one.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempts.min(16);
        self.attempts = self.attempts.saturating_add(1);
        let raw = BASE_DELAY.saturating_mul(FACTOR.saturating_pow(exponent));
        let capped = raw.min(MAX_DELAY);
        jitter(capped)
    }

    /// Reset on reaching `Ready`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

fn jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(JITTER_LOW..JITTER_HIGH);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_are_capped() {
        let mut policy = RetryPolicy::new();
        let mut previous_upper = Duration::ZERO;
        for _ in 0..10 {
            let delay = policy.next_delay();
            // Jitter bounds: delay is within [0.5, 1.5) of the raw value,
            // and the raw value never exceeds the cap.
            assert!(delay <= MAX_DELAY.mul_f64(JITTER_HIGH));
            previous_upper = previous_upper.max(delay);
        }
        assert!(previous_upper >= BASE_DELAY.mul_f64(JITTER_LOW));
        assert_eq!(policy.attempts(), 10);
    }

    #[test]
    fn reset_starts_the_schedule_over() {
        let mut policy = RetryPolicy::new();
        for _ in 0..5 {
            policy.next_delay();
        }
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        let delay = policy.next_delay();
        assert!(delay <= BASE_DELAY.mul_f64(JITTER_HIGH));
    }
}
