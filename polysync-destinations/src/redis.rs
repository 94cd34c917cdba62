use async_trait::async_trait;
use fred::prelude::{
    ClientLike, EventInterface, FredResult, KeysInterface, Pool, ReconnectPolicy, Server,
    ServerConfig, TcpConfig,
};
use fred::types::config::UnresponsiveConfig;
use fred::types::{Builder, Expiration};
use futures::future::join_all;
use polysync::clients::CacheClient;
use polysync::error::{ErrorKind, SyncResult};
use polysync::sync_error;
use polysync_config::shared::RedisConfig;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

const POOL_SIZE: usize = 5;

/// Cache adapter backed by a pool of Redis connections.
///
/// Values are stored as json strings. When the configuration carries a ttl every write sets
/// it, so stale projections expire even if their delete is lost.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    ttl: Option<Expiration>,
}

impl RedisCache {
    /// Connects to Redis and waits until the pool is ready.
    pub async fn connect(config: &RedisConfig) -> SyncResult<Self> {
        let pool = build_pool(config).map_err(|err| {
            sync_error!(
                ErrorKind::DestinationConnectionFailed,
                "Could not configure the Redis pool",
                err.to_string()
            )
        })?;

        for client in pool.clients() {
            let mut error_rx = client.error_rx();
            let mut reconnect_rx = client.reconnect_rx();
            let mut unresponsive_rx = client.unresponsive_rx();

            tokio::spawn(async move {
                loop {
                    match error_rx.recv().await {
                        Ok((err, Some(server))) => error!("redis client ({server:?}) error: {err:?}"),
                        Ok((err, None)) => error!("redis client error: {err:?}"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            tokio::spawn(async move {
                loop {
                    match unresponsive_rx.recv().await {
                        Ok(server) => error!("redis client ({server:?}) unresponsive"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            tokio::spawn(async move {
                loop {
                    match reconnect_rx.recv().await {
                        Ok(server) => debug!("redis client connected to {server:?}"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }

        let connections = pool.connect_pool();
        pool.wait_for_connect().await.map_err(|err| {
            sync_error!(
                ErrorKind::DestinationConnectionFailed,
                "Could not connect to Redis",
                err.to_string()
            )
        })?;
        debug!(host = %config.host, port = config.port, "connected to redis");

        tokio::spawn(async move {
            let _results = join_all(connections).await;
        });

        Ok(Self {
            pool,
            ttl: config.ttl_secs.map(Expiration::EX),
        })
    }
}

fn build_pool(config: &RedisConfig) -> FredResult<Pool> {
    let host = config.host.clone();
    let port = config.port;
    let username = config.username.clone();
    let password = config
        .password
        .as_ref()
        .map(|password| password.expose_secret().to_owned());

    Builder::default_centralized()
        .with_config(|redis_config| {
            redis_config.username = username;
            redis_config.password = password;
            redis_config.server = ServerConfig::Centralized {
                server: Server::new(host, port),
            };
        })
        .with_connection_config(|config| {
            config.internal_command_timeout = Duration::from_secs(5);
            config.reconnect_on_auth_error = true;
            config.tcp = TcpConfig {
                #[cfg(target_os = "linux")]
                user_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            };
            config.unresponsive = UnresponsiveConfig {
                max_timeout: Some(Duration::from_secs(10)),
                interval: Duration::from_secs(3),
            };
        })
        .with_performance_config(|config| {
            config.default_command_timeout = Duration::from_secs(5);
        })
        .set_policy(ReconnectPolicy::new_exponential(0, 1, 2000, 5))
        .build_pool(POOL_SIZE)
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        let cached: Option<String> = self.pool.get(key).await.map_err(|err| {
            sync_error!(
                ErrorKind::CacheOperationFailed,
                "Redis get failed",
                format!("key `{key}`: {err}")
            )
        })?;

        let Some(cached) = cached else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_str(&cached)?))
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        let encoded = serde_json::to_string(&value)?;
        self.pool
            .set::<(), _, _>(key, encoded, self.ttl.clone(), None, false)
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::CacheOperationFailed,
                    "Redis set failed",
                    format!("key `{key}`: {err}")
                )
            })
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.pool.del::<(), _>(key).await.map_err(|err| {
            sync_error!(
                ErrorKind::CacheOperationFailed,
                "Redis delete failed",
                format!("key `{key}`: {err}")
            )
        })
    }
}
