use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::error::ConfigError;
use crate::kafka::config::ConsumerConfigBuilder;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_DURATION: Duration = Duration::from_secs(1);

/// Stop conditions for one accumulation cycle. Whichever is hit first
/// completes the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    max_batch_size: usize,
    max_batch_duration: Duration,
}

impl BatchConfig {
    pub fn new(max_batch_size: usize, max_batch_duration: Duration) -> Result<Self, ConfigError> {
        if max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if max_batch_duration.is_zero() {
            return Err(ConfigError::ZeroBatchDuration);
        }
        Ok(Self {
            max_batch_size,
            max_batch_duration,
        })
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_batch_duration(&self) -> Duration {
        self.max_batch_duration
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_duration: DEFAULT_BATCH_DURATION,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "batch-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "events")]
    pub kafka_consumer_topic: String,

    // earliest, latest
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // enables cooperative-sticky assignment with static membership when set
    pub kafka_client_id: Option<String>,

    #[envconfig(default = "10")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_duration_ms: EnvMsDuration,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn batch_config(&self) -> Result<BatchConfig, ConfigError> {
        BatchConfig::new(self.batch_size, self.batch_duration_ms.0)
    }

    pub fn consumer_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::for_batch_consumer(&self.kafka_hosts, &self.kafka_consumer_group)
            .with_tls(self.kafka_tls)
            .with_offset_reset(&self.kafka_consumer_offset_reset)
            .with_sticky_partition_assignment(self.kafka_client_id.as_deref())
            .build()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_batch_config_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size(), 10);
        assert_eq!(config.max_batch_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_batch_config_rejects_zero_values() {
        assert_eq!(
            BatchConfig::new(0, Duration::from_secs(1)),
            Err(ConfigError::ZeroBatchSize)
        );
        assert_eq!(
            BatchConfig::new(5, Duration::ZERO),
            Err(ConfigError::ZeroBatchDuration)
        );
        let config = BatchConfig::new(5, Duration::from_millis(250)).unwrap();
        assert_eq!(config.max_batch_size(), 5);
        assert_eq!(config.max_batch_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_env_ms_duration_parsing() {
        let parsed: EnvMsDuration = "1500".parse().unwrap();
        assert_eq!(parsed.0, Duration::from_millis(1500));
        assert_eq!(
            "soon".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }

    #[test]
    fn test_config_from_hashmap() {
        let mut env = HashMap::new();
        env.insert("KAFKA_CONSUMER_TOPIC".to_string(), "clicks".to_string());
        env.insert("BATCH_SIZE".to_string(), "25".to_string());
        env.insert("BATCH_DURATION_MS".to_string(), "200".to_string());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka_consumer_topic, "clicks");
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(config.kafka_client_id.is_none());

        let batch_config = config.batch_config().unwrap();
        assert_eq!(batch_config.max_batch_size(), 25);
        assert_eq!(batch_config.max_batch_duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let mut env = HashMap::new();
        env.insert("BATCH_SIZE".to_string(), "0".to_string());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.batch_config(), Err(ConfigError::ZeroBatchSize));
    }
}
