use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection parameters of the derived stores. Each section is optional; a missing section
/// means the corresponding projection is not maintained by this service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoresConfig {
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub clickhouse: Option<ClickHouseConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
}

impl StoresConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(redis) = &self.redis
            && redis.host.trim().is_empty()
        {
            return Err(ValidationError::invalid("stores.redis.host", "must not be empty"));
        }

        if let Some(clickhouse) = &self.clickhouse
            && !clickhouse.url.starts_with("http")
        {
            return Err(ValidationError::invalid(
                "stores.clickhouse.url",
                "must be an http(s) url",
            ));
        }

        if let Some(kafka) = &self.kafka
            && kafka.brokers.trim().is_empty()
        {
            return Err(ValidationError::invalid(
                "stores.kafka.brokers",
                "must list at least one broker",
            ));
        }

        Ok(())
    }
}

/// Cache layer connection.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Expiration applied to cached projections, none keeps them until invalidated.
    pub ttl_secs: Option<i64>,
}

/// Columnar analytics store connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: Option<SecretString>,
    pub database: String,
}

/// Event bus connection.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated bootstrap servers.
    pub brokers: String,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

fn default_redis_port() -> u16 {
    6379
}

fn default_message_timeout_ms() -> u64 {
    5_000
}
