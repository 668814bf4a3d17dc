//! Retry schedule for the discovery pipeline.
//!
//! Delays grow quadratically with the attempt number (1s, 4s, 9s, ...) and
//! are capped. Retries never give up.

use std::time::Duration;

/// Default cap for the retry delay (seconds).
pub const MAX_BACKOFF_SECS: u64 = 30;

/// Returns the delay before retry number `attempt` (1-based).
///
/// `min(attempt², cap)` seconds. Attempt 0 yields no delay.
pub fn backoff_delay(attempt: u32, cap_secs: u64) -> Duration {
    let attempt = u64::from(attempt);
    Duration::from_secs(attempt.saturating_mul(attempt).min(cap_secs))
}

/// Failure counter for one discovery chain.
///
/// A chain starts at zero attempts. Each recorded failure advances the
/// counter and yields the delay to wait before the next attempt. Scheduled
/// retries keep counting; only a new chain starts over.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    cap_secs: u64,
}

impl Backoff {
    pub fn new(cap_secs: u64) -> Self {
        Self {
            attempts: 0,
            cap_secs,
        }
    }

    /// Records a failed attempt and returns the delay before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        backoff_delay(self.attempts, self.cap_secs)
    }

    /// Number of failures recorded in this chain.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MAX_BACKOFF_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_squares_then_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.record_failure().as_secs()).collect();
        assert_eq!(delays, vec![1, 4, 9, 16, 25, 30, 30, 30]);
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn large_attempt_counts_stay_capped() {
        assert_eq!(backoff_delay(1_000, 30), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX, 30), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_means_no_delay() {
        assert_eq!(backoff_delay(0, 30), Duration::ZERO);
    }

    #[test]
    fn new_chain_starts_fresh() {
        let mut first = Backoff::default();
        first.record_failure();
        first.record_failure();

        let mut second = Backoff::default();
        assert_eq!(second.record_failure(), Duration::from_secs(1));
    }

    #[test]
    fn custom_cap_is_respected() {
        let mut backoff = Backoff::new(5);
        assert_eq!(backoff.record_failure(), Duration::from_secs(1));
        assert_eq!(backoff.record_failure(), Duration::from_secs(4));
        assert_eq!(backoff.record_failure(), Duration::from_secs(5));
    }
}
