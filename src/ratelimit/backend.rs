//! Store trait for abstracting in-process and shared counter backends.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::record::RateLimitRecord;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for rate limit store implementations.
///
/// This trait abstracts over both the `MemoryStore` and the
/// `DistributedStore` so a `RateLimiter` can work with either.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Prune entries older than `window`, record one request, and return the
    /// resulting count. Atomic with respect to concurrent callers of `key`.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Read the current record for a key without recording a request.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    /// Purge expired records and return how many were removed.
    ///
    /// A no-op for backends with native expiry.
    async fn cleanup(&self) -> Result<usize, StoreError>;
}
