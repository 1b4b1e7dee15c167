//! Redis-backed cache backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use super::{CacheBackend, CacheError};

const BACKEND: &str = "redis";

/// Bound on connecting and on every command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Key used by the startup probe.
const PROBE_KEY: &str = "newswire:probe";

/// Networked cache over a multiplexed Redis connection.
///
/// Values are stored as strings with `SET EX`; Redis expires them, so a read
/// past TTL is absent by construction.
#[derive(Clone)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connects to `url` and probes the server once.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the URL is invalid, the
    /// connection fails, or the probe does not answer in time.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::unavailable(BACKEND, format!("invalid cache URL: {e}")))?;
        let mut connection = bounded(client.get_multiplexed_async_connection()).await?;

        let _: bool = bounded(connection.exists(PROBE_KEY)).await?;
        debug!("redis cache probe succeeded");
        Ok(Self { connection })
    }
}

async fn bounded<T>(
    future: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, CacheError> {
    match tokio::time::timeout(COMMAND_TIMEOUT, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CacheError::unavailable(BACKEND, e.to_string())),
        Err(_) => Err(CacheError::unavailable(
            BACKEND,
            format!("no answer within {}ms", COMMAND_TIMEOUT.as_millis()),
        )),
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        bounded(connection.get(key)).await
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        // Redis rejects EX 0; round up to the one-second floor.
        let seconds = ttl.as_secs().max(1);
        bounded(connection.set_ex::<_, _, ()>(key, value, seconds)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        bounded(connection.del::<_, ()>(key)).await
    }
}
