use anyhow::{Error, Result, anyhow};
use redis::{Client, aio::MultiplexedConnection};
use tracing::info;

use crate::{config::Config, utils::retry_with_backoff};

/// Shared connection used by the gateway circuit breaker.
pub async fn connect(config: &Config) -> Result<MultiplexedConnection, Error> {
    info!("Connecting to Redis");

    let client = Client::open(config.redis_url.as_str())
        .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

    let connection = retry_with_backoff(&config.retry_config(), || {
        client.get_multiplexed_async_connection()
    })
    .await
    .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

    info!("Redis connection established");

    Ok(connection)
}
