//! In-process sliding-window store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::backend::{RateLimitStore, StoreError};
use super::clock::{Clock, SystemClock};
use super::record::RateLimitRecord;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A single-process store that keeps request timestamps per key.
///
/// Increments for the same key are serialized by the map's shard lock, so
/// concurrent callers in one process never lose an update.
pub struct MemoryStore {
    /// Records indexed by storage key
    records: DashMap<String, RateLimitRecord>,
    clock: Arc<dyn Clock>,
    /// Background sweeper, aborted on drop
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Start a background task that calls `cleanup` every `interval`.
    ///
    /// The task only holds a weak reference and exits once the store is
    /// dropped. Calling this again replaces the previous sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed = removed, "Swept expired rate limit records");
                }
            }
        });

        info!(interval = ?interval, "Memory store sweeper started");
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background sweeper, if one is running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        // The entry guard holds the shard write lock until dropped
        let mut record = self.records.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating new rate limit record");
            RateLimitRecord::default()
        });
        let count = record.slide_and_push(now, window_ms);

        trace!(key = %key, count = count, "Incremented memory record");
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.get(key).map(|record| record.clone()))
    }

    async fn cleanup(&self) -> Result<usize, StoreError> {
        Ok(self.sweep())
    }
}
