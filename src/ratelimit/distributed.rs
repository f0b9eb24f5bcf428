//! Distributed sliding-window store backed by Redis.
//!
//! Each storage key maps to a sorted set of request timestamps. A single Lua
//! script prunes, inserts, refreshes the TTL and counts, so the whole
//! increment is one atomic round-trip no matter how many instances share
//! the backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::backend::{RateLimitStore, StoreError};
use super::record::RateLimitRecord;

/// Default bound on a single store round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_500);
/// Default namespace for keys written by this store.
pub const DEFAULT_KEY_PREFIX: &str = "quotagate";

/// Uses the server clock so every instance slides against the same "now".
const INCREMENT_SCRIPT: &str = r#"
if redis.replicate_commands then redis.replicate_commands() end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local window = tonumber(ARGV[1])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
redis.call('ZADD', KEYS[1], now, now .. '-' .. ARGV[2])
redis.call('PEXPIRE', KEYS[1], window)
return redis.call('ZCARD', KEYS[1])
"#;

/// Connection settings for the distributed store.
#[derive(Debug, Clone)]
pub struct DistributedStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix prepended to every storage key
    pub key_prefix: String,
    /// Bound on each round-trip
    pub timeout: Duration,
}

impl DistributedStoreConfig {
    /// Settings for `url` with default prefix and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A store shared by every instance connected to the same Redis.
pub struct DistributedStore {
    connection: ConnectionManager,
    script: Script,
    key_prefix: String,
    timeout: Duration,
}

impl DistributedStore {
    /// Connect to the backend and verify it answers.
    pub async fn connect(config: DistributedStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(config.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(config.timeout))??;

        let store = Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            key_prefix: config.key_prefix,
            timeout: config.timeout,
        };

        let mut conn = store.connection.clone();
        store
            .bounded(async move { redis::cmd("PING").query_async::<String>(&mut conn).await })
            .await?;

        info!(url = %config.url, "Connected to distributed rate limit store");
        Ok(store)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Run a backend call under the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        bounded(self.timeout, call).await
    }
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => {
            warn!(timeout = ?timeout, "Distributed store call timed out");
            Err(StoreError::Timeout(timeout))
        }
    }
}

#[async_trait]
impl RateLimitStore for DistributedStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let redis_key = self.namespaced(key);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let member = Uuid::new_v4().to_string();

        let mut conn = self.connection.clone();
        let mut invocation = self.script.key(&redis_key);
        invocation.arg(window_ms).arg(member);

        let count: u64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;

        trace!(key = %redis_key, count = count, "Incremented distributed record");
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let redis_key = self.namespaced(key);
        let mut conn = self.connection.clone();

        let (entries, ttl_ms, now): (Vec<(String, i64)>, i64, (i64, i64)) = self
            .bounded(async move {
                redis::pipe()
                    .atomic()
                    .cmd("ZRANGE")
                    .arg(&redis_key)
                    .arg(0)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .cmd("PTTL")
                    .arg(&redis_key)
                    .cmd("TIME")
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        // PTTL is negative when the key is missing or has no expiry
        if entries.is_empty() || ttl_ms < 0 {
            return Ok(None);
        }

        let now_ms = now.0 * 1000 + now.1 / 1000;
        let request_timestamps: Vec<i64> = entries.into_iter().map(|(_, score)| score).collect();

        debug!(key = %key, count = request_timestamps.len(), "Read distributed record");
        Ok(Some(RateLimitRecord {
            count: request_timestamps.len() as u64,
            reset_time: now_ms + ttl_ms,
            request_timestamps,
        }))
    }

    async fn cleanup(&self) -> Result<usize, StoreError> {
        // Redis expires keys through PEXPIRE
        Ok(0)
    }
}
