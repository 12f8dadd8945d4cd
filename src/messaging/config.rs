//! Producer and consumer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Producer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProducerConfig {
    /// Target stream
    #[validate(length(min = 1))]
    pub stream_key: String,

    /// Approximate retention cap applied on every append
    #[validate(range(min = 1))]
    pub max_len: usize,
}

impl ProducerConfig {
    pub fn new(stream_key: impl Into<String>, max_len: usize) -> Self {
        Self {
            stream_key: stream_key.into(),
            max_len,
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConsumerConfig {
    /// Source stream
    #[validate(length(min = 1))]
    pub stream_key: String,

    /// Consumer group sharing the delivery cursor
    #[validate(length(min = 1))]
    pub group_name: String,

    /// Identity of this consumer within the group; owns its pending entries
    #[validate(length(min = 1))]
    pub consumer_name: String,
}

impl ConsumerConfig {
    pub fn new(
        stream_key: impl Into<String>,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            group_name: group_name.into(),
            consumer_name: consumer_name.into(),
        }
    }
}

/// Backoff applied between failed reads while the consumer is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Delay after the first failure in milliseconds
    #[validate(range(min = 1))]
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the delay in milliseconds
    #[validate(range(min = 1))]
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor applied per consecutive failure
    #[validate(range(min = 1.0))]
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_backoff(), Duration::from_millis(100));
        assert_eq!(config.max_backoff(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_backoff_never_below_initial() {
        let config = RetryConfig {
            initial_backoff_ms: 500,
            max_backoff_ms: 10,
            multiplier: 2.0,
        };
        assert_eq!(config.max_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_consumer_config_validation() {
        let config = ConsumerConfig::new("events", "", "worker-1");
        assert!(config.validate().is_err());

        let config = ConsumerConfig::new("events", "workers", "worker-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_producer_config_validation() {
        assert!(ProducerConfig::new("events", 0).validate().is_err());
        assert!(ProducerConfig::new("", 10).validate().is_err());
        assert!(ProducerConfig::new("events", 10).validate().is_ok());
    }
}
