//! # Exponential Backoff
//!
//! Bounded exponential backoff for retrying transient failures.
//!
//! Sequence with the default bounds: 5s, 10s, 20s, 40s, 80s, 160s, 300s (max).
//! Both a stateful form (kept per object key between reconcile passes) and a
//! stateless form (derived from a failure count) are provided.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each backoff doubles the previous one, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First backoff value (for reset)
    min: Duration,
    /// Value returned by the next call
    current: Duration,
    /// Cap
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Calculate the backoff for a given number of consecutive failures (stateless)
    ///
    /// `error_count` 0 and 1 both yield `min`; every further failure doubles
    /// the delay until it reaches `max`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min: Duration, max: Duration) -> Duration {
        let exponent = error_count.saturating_sub(1).min(31);
        let delay = min.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(secs(5), secs(300));
        let sequence: Vec<u64> = (0..8).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(sequence, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(secs(5), secs(300));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), secs(5));
    }

    #[test]
    fn test_calculate_for_error_count() {
        let min = secs(5);
        let max = secs(300);
        assert_eq!(ExponentialBackoff::calculate_for_error_count(0, min, max), secs(5));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(1, min, max), secs(5));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(2, min, max), secs(10));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(4, min, max), secs(40));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(7, min, max), secs(300));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(u32::MAX, min, max), secs(300));
    }

    #[test]
    fn test_stateful_matches_stateless() {
        let mut backoff = ExponentialBackoff::new(secs(2), secs(60));
        for count in 1..10 {
            assert_eq!(
                backoff.next_backoff(),
                ExponentialBackoff::calculate_for_error_count(count, secs(2), secs(60))
            );
        }
    }
}
