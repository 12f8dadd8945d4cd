//! Capped exponential backoff for failed reads

use crate::messaging::config::RetryConfig;
use std::time::Duration;

/// Tracks consecutive read failures and yields the delay before the next attempt
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.failures.min(32) as i32;
        self.failures = self.failures.saturating_add(1);

        let initial_ms = self.config.initial_backoff_ms as f64;
        let max = self.config.max_backoff();
        let delay_ms = initial_ms * self.config.multiplier.max(1.0).powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
            max
        } else {
            Duration::from_millis(delay_ms.round() as u64)
        }
    }

    /// Forget previous failures after a successful read
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_backoff_ms: u64, max_backoff_ms: u64) -> RetryConfig {
        RetryConfig {
            initial_backoff_ms,
            max_backoff_ms,
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_exponential_growth() {
        let mut backoff = Backoff::new(config(100, 10_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.failures(), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = Backoff::new(config(100, 1_000));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(1));
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(config(50, 1_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
