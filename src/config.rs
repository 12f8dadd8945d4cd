use crate::error::{AppError, Result};
use crate::messaging::{ConsumerConfig, ProducerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Environment variable prefix, e.g. `STREAM_MQ__PRODUCER__STREAM_KEY`
pub const ENV_PREFIX: &str = "STREAM_MQ";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Redis connection string
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Producer section, required by `produce`
    #[serde(default)]
    pub producer: Option<ProducerConfig>,

    /// Consumer section, required by `consume`
    #[serde(default)]
    pub consumer: Option<ConsumerConfig>,

    /// Read retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Settings {
    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate_sections()?;

        Ok(settings)
    }

    /// Validate every present section
    pub fn validate_sections(&self) -> Result<()> {
        if self.redis_url.trim().is_empty() {
            return Err(AppError::Validation("redis_url must not be empty".to_string()));
        }
        if let Some(producer) = &self.producer {
            producer.validate()?;
        }
        if let Some(consumer) = &self.consumer {
            consumer.validate()?;
        }
        self.retry.validate()?;

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            producer: None,
            consumer: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
