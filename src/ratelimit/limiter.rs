//! Core rate limiter implementation.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::error::{QuotagateError, Result};

use super::backend::{RateLimitStore, StoreError};
use super::clock::{Clock, SystemClock};
use super::key::{validate_limiter_name, KeyGenerator, PrefixedKey};
use super::observer::{LimitEvent, LimitObserver};
use super::record::{RateLimitDecision, RateLimitInfo, RateLimitRecord};
use super::rules::{FailurePolicy, LimiterPolicy};

/// Longest accepted window (366 days).
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 86_400);

/// Validated configuration for one limiter.
///
/// Immutable once handed to [`RateLimiter::new`].
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub requests_per_window: u64,
    /// Sliding window length
    pub window: Duration,
    /// Identifier to storage key mapping
    pub key_generator: Arc<dyn KeyGenerator>,
    /// Notified on every denial
    pub observer: Option<Arc<dyn LimitObserver>>,
    /// Behaviour when the store fails
    pub failure_policy: FailurePolicy,
}

impl RateLimitConfig {
    /// Create a fail-open configuration with the default key scheme.
    pub fn new(requests_per_window: u64, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            key_generator: Arc::new(PrefixedKey),
            observer: None,
            failure_policy: FailurePolicy::FailOpen,
        }
    }

    /// Build a configuration from a serializable policy.
    pub fn from_policy(policy: &LimiterPolicy) -> Self {
        Self::new(policy.requests_per_window, policy.window.duration())
            .with_failure_policy(policy.failure_policy)
    }

    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LimitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Reject non-positive quotas and windows.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_window == 0 {
            return Err(QuotagateError::Config(
                "requests_per_window must be greater than zero".to_string(),
            ));
        }
        if self.window.as_millis() == 0 {
            return Err(QuotagateError::Config(
                "window must be at least one millisecond".to_string(),
            ));
        }
        if self.window > MAX_WINDOW {
            return Err(QuotagateError::Config(format!(
                "window must not exceed {} days",
                MAX_WINDOW.as_secs() / 86_400
            )));
        }
        if let FailurePolicy::FailClosedAfter {
            consecutive_failures: 0,
        } = self.failure_policy
        {
            return Err(QuotagateError::Config(
                "consecutive_failures must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Window length in whole seconds, rounded up.
    fn retry_after_secs(&self) -> u64 {
        let ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        ms.div_ceil(1000)
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("requests_per_window", &self.requests_per_window)
            .field("window", &self.window)
            .field("has_observer", &self.observer.is_some())
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

/// A named sliding-window limiter over a shared store.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    /// Store failures since the last successful call
    failure_streak: AtomicU32,
    /// Total store failures over the limiter's lifetime
    store_failures: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter, failing immediately on invalid configuration.
    pub fn new(
        name: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self> {
        Self::with_clock(name, config, store, Arc::new(SystemClock))
    }

    /// Create a limiter that computes reset times from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        validate_limiter_name(&name).map_err(QuotagateError::Config)?;
        config
            .validate()
            .map_err(|e| QuotagateError::Config(format!("limiter '{}': {}", name, e)))?;

        debug!(
            limiter = %name,
            limit = config.requests_per_window,
            window = ?config.window,
            "Creating rate limiter"
        );

        Ok(Self {
            name,
            config,
            store,
            clock,
            failure_streak: AtomicU32::new(0),
            store_failures: AtomicU64::new(0),
        })
    }

    /// Record one request for `identifier` and decide whether it may proceed.
    ///
    /// Denial is a normal return value. Store failures are logged and
    /// resolved through the configured [`FailurePolicy`].
    pub async fn check_limit(&self, identifier: &str) -> RateLimitDecision {
        let key = self.storage_key(identifier);

        trace!(limiter = %self.name, key = %key, "Checking rate limit");

        match self.store.increment(&key, self.config.window).await {
            Ok(count) => {
                self.failure_streak.store(0, Ordering::SeqCst);
                self.decide(identifier, count)
            }
            Err(e) => self.on_store_failure(identifier, &key, e),
        }
    }

    /// Read the stored record for `identifier` without consuming quota.
    pub async fn peek(&self, identifier: &str) -> Result<Option<RateLimitRecord>> {
        let key = self.storage_key(identifier);
        Ok(self.store.get(&key).await?)
    }

    /// The storage key `identifier` is counted under.
    pub fn storage_key(&self, identifier: &str) -> String {
        self.config.key_generator.storage_key(&self.name, identifier)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Total store failures seen by this limiter.
    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::SeqCst)
    }

    fn decide(&self, identifier: &str, count: u64) -> RateLimitDecision {
        let limit = self.config.requests_per_window;
        let allowed = count <= limit;

        let info = RateLimitInfo {
            identifier: identifier.to_string(),
            limit,
            remaining: limit.saturating_sub(count),
            reset_time: self.clock.now_millis().saturating_add(self.config.window_ms()),
            retry_after: if allowed {
                0
            } else {
                self.config.retry_after_secs()
            },
        };

        if !allowed {
            debug!(
                limiter = %self.name,
                identifier = %identifier,
                count = count,
                limit = limit,
                "Rate limit exceeded"
            );
            self.notify(&info);
        }

        RateLimitDecision { allowed, info }
    }

    fn on_store_failure(&self, identifier: &str, key: &str, err: StoreError) -> RateLimitDecision {
        self.store_failures.fetch_add(1, Ordering::SeqCst);
        let streak = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;

        let limit = self.config.requests_per_window;
        let reset_time = self.clock.now_millis().saturating_add(self.config.window_ms());

        match self.config.failure_policy {
            FailurePolicy::FailClosedAfter {
                consecutive_failures,
            } if streak >= consecutive_failures => {
                error!(
                    limiter = %self.name,
                    key = %key,
                    streak = streak,
                    error = %err,
                    "Rate limit store failing, denying request"
                );
                let info = RateLimitInfo {
                    identifier: identifier.to_string(),
                    limit,
                    remaining: 0,
                    reset_time,
                    retry_after: self.config.retry_after_secs(),
                };
                self.notify(&info);
                RateLimitDecision {
                    allowed: false,
                    info,
                }
            }
            _ => {
                warn!(
                    limiter = %self.name,
                    key = %key,
                    streak = streak,
                    error = %err,
                    "Rate limit store failed, allowing request"
                );
                RateLimitDecision {
                    allowed: true,
                    info: RateLimitInfo {
                        identifier: identifier.to_string(),
                        limit,
                        remaining: limit,
                        reset_time,
                        retry_after: 0,
                    },
                }
            }
        }
    }

    fn notify(&self, info: &RateLimitInfo) {
        if let Some(observer) = &self.config.observer {
            observer.on_limit_reached(&LimitEvent {
                limiter: self.name.clone(),
                info: info.clone(),
            });
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::MemoryStore;
    use crate::ratelimit::observer::ChannelObserver;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio_test::{assert_err, assert_ok};

    /// A store that fails while `down` is set, and counts otherwise.
    struct FlakyStore {
        down: AtomicBool,
        inner: MemoryStore,
    }

    impl FlakyStore {
        fn new(down: bool) -> Self {
            Self {
                down: AtomicBool::new(down),
                inner: MemoryStore::new(),
            }
        }
    }

    #[async_trait]
    impl RateLimitStore for FlakyStore {
        async fn increment(
            &self,
            key: &str,
            window: Duration,
        ) -> std::result::Result<u64, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.increment(key, window).await
        }

        async fn get(
            &self,
            key: &str,
        ) -> std::result::Result<Option<RateLimitRecord>, StoreError> {
            self.inner.get(key).await
        }

        async fn cleanup(&self) -> std::result::Result<usize, StoreError> {
            self.inner.cleanup().await
        }
    }

    fn limiter(limit: u64, window: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::with_clock(
            "test",
            RateLimitConfig::new(limit, window),
            store,
            clock.clone(),
        )
        .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_zero_limit_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = RateLimiter::new(
            "bad",
            RateLimitConfig::new(0, Duration::from_secs(1)),
            store,
        );
        assert!(matches!(result, Err(QuotagateError::Config(_))));
    }

    #[test]
    fn test_oversized_window_rejected() {
        let store = Arc::new(MemoryStore::new());

        for window in [
            MAX_WINDOW + Duration::from_millis(1),
            Duration::from_millis(i64::MAX as u64),
            Duration::from_millis(u64::MAX),
        ] {
            let result = RateLimiter::new("huge", RateLimitConfig::new(1, window), store.clone());
            assert!(matches!(result, Err(QuotagateError::Config(_))));
        }
    }

    #[test]
    fn test_name_with_separator_rejected() {
        let store = Arc::new(MemoryStore::new());
        let config = RateLimitConfig::new(1, Duration::from_secs(60));

        assert_err!(RateLimiter::new("a:b", config.clone(), store.clone()));
        assert_err!(RateLimiter::new("", config, store));
    }

    #[tokio::test]
    async fn test_longest_window_still_denies() {
        let (limiter, clock) = limiter(1, MAX_WINDOW);

        assert!(limiter.check_limit("user").await.allowed);
        clock.advance(Duration::from_secs(365 * 86_400));

        let decision = limiter.check_limit("user").await;
        assert!(!decision.allowed);
        assert_eq!(decision.info.retry_after, MAX_WINDOW.as_secs());
    }

    #[test]
    fn test_zero_window_rejected() {
        let store = Arc::new(MemoryStore::new());
        assert_err!(RateLimiter::new(
            "bad",
            RateLimitConfig::new(1, Duration::ZERO),
            store.clone()
        ));
        assert_err!(RateLimiter::new(
            "bad",
            RateLimitConfig::new(1, Duration::from_micros(999)),
            store
        ));
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let config = RateLimitConfig::new(1, Duration::from_secs(1)).with_failure_policy(
            FailurePolicy::FailClosedAfter {
                consecutive_failures: 0,
            },
        );
        assert_err!(config.validate());
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_denies() {
        let (limiter, _clock) = limiter(3, Duration::from_secs(10));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_limit("user").await;
            assert!(decision.allowed);
            assert_eq!(decision.info.remaining, expected_remaining);
            assert_eq!(decision.info.retry_after, 0);
        }

        let decision = limiter.check_limit("user").await;
        assert!(!decision.allowed);
        assert_eq!(decision.info.remaining, 0);
        assert_eq!(decision.info.retry_after, 10);
    }

    #[tokio::test]
    async fn test_reset_time_is_now_plus_window() {
        let (limiter, clock) = limiter(3, Duration::from_secs(10));

        let decision = limiter.check_limit("user").await;
        assert_eq!(decision.info.reset_time, clock.now_millis() + 10_000);
    }

    #[tokio::test]
    async fn test_window_slides_continuously() {
        let (limiter, clock) = limiter(2, Duration::from_millis(1_000));

        assert!(limiter.check_limit("user").await.allowed);
        clock.advance(Duration::from_millis(500));
        assert!(limiter.check_limit("user").await.allowed);
        clock.advance(Duration::from_millis(400));
        assert!(!limiter.check_limit("user").await.allowed);

        // The first request leaves the window, but the denied one still counts
        clock.advance(Duration::from_millis(101));
        assert!(!limiter.check_limit("user").await.allowed);

        clock.advance(Duration::from_millis(1_001));
        assert!(limiter.check_limit("user").await.allowed);
    }

    #[tokio::test]
    async fn test_sub_second_window_retry_after_rounds_up() {
        let (limiter, _clock) = limiter(1, Duration::from_millis(250));

        limiter.check_limit("user").await;
        let decision = limiter.check_limit("user").await;
        assert_eq!(decision.info.retry_after, 1);
    }

    #[tokio::test]
    async fn test_observer_receives_denials_only() {
        let (observer, mut receiver) = ChannelObserver::new();
        let store = Arc::new(MemoryStore::new());
        let config =
            RateLimitConfig::new(1, Duration::from_secs(60)).with_observer(Arc::new(observer));
        let limiter = RateLimiter::new("summary-free", config, store).unwrap();

        assert!(limiter.check_limit("token").await.allowed);
        assert!(receiver.try_recv().is_err());

        assert!(!limiter.check_limit("token").await.allowed);
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.limiter, "summary-free");
        assert_eq!(event.info.identifier, "token");
        assert_eq!(event.info.retry_after, 60);
    }

    #[tokio::test]
    async fn test_custom_key_generator() {
        let store = Arc::new(MemoryStore::new());
        let config = RateLimitConfig::new(1, Duration::from_secs(60))
            .with_key_generator(Arc::new(|_: &str, identifier: &str| {
                format!("shared:{}", identifier)
            }));
        let limiter = RateLimiter::new("any", config, store.clone()).unwrap();

        assert_eq!(limiter.storage_key("abc"), "shared:abc");
        limiter.check_limit("abc").await;
        assert!(assert_ok!(store.get("shared:abc").await).is_some());
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let store = Arc::new(FlakyStore::new(true));
        let config = RateLimitConfig::new(5, Duration::from_secs(60));
        let limiter = RateLimiter::new("flaky", config, store).unwrap();

        for _ in 0..10 {
            let decision = limiter.check_limit("user").await;
            assert!(decision.allowed);
            assert_eq!(decision.info.remaining, 5);
            assert_eq!(decision.info.retry_after, 0);
        }
        assert_eq!(limiter.store_failures(), 10);
    }

    #[tokio::test]
    async fn test_fail_closed_after_consecutive_failures() {
        let store = Arc::new(FlakyStore::new(true));
        let config = RateLimitConfig::new(5, Duration::from_secs(60)).with_failure_policy(
            FailurePolicy::FailClosedAfter {
                consecutive_failures: 2,
            },
        );
        let limiter = RateLimiter::new("strict", config, store.clone()).unwrap();

        assert!(limiter.check_limit("user").await.allowed);
        let decision = limiter.check_limit("user").await;
        assert!(!decision.allowed);
        assert_eq!(decision.info.retry_after, 60);

        // Recovery resets the streak
        store.down.store(false, Ordering::SeqCst);
        assert!(limiter.check_limit("user").await.allowed);
        store.down.store(true, Ordering::SeqCst);
        assert!(limiter.check_limit("user").await.allowed);
    }

    #[tokio::test]
    async fn test_peek_does_not_consume_quota() {
        let (limiter, _clock) = limiter(2, Duration::from_secs(60));

        assert!(limiter.peek("user").await.unwrap().is_none());
        limiter.check_limit("user").await;

        let record = limiter.peek("user").await.unwrap().unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(limiter.check_limit("user").await.info.remaining, 0);
    }
}
