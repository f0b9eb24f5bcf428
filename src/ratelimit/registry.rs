//! Named limiter registry.
//!
//! The registry is built once at startup and shared by reference. Limiters
//! are constructed lazily on first lookup, exactly once per name, and all of
//! them count against the same store under distinct key namespaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{QuotagateError, Result};

use super::backend::RateLimitStore;
use super::clock::{Clock, SystemClock};
use super::limiter::{RateLimitConfig, RateLimiter};
use super::observer::LimitObserver;
use super::record::RateLimitDecision;
use super::rules::{default_policies, LimiterPolicy};

/// Lazily populated map of named limiters.
pub struct LimiterRegistry {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policies: BTreeMap<String, LimiterPolicy>,
    observer: Option<Arc<dyn LimitObserver>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl LimiterRegistry {
    /// Create a registry over `store` with the given policies.
    pub fn new(store: Arc<dyn RateLimitStore>, policies: BTreeMap<String, LimiterPolicy>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policies,
            observer: None,
            limiters: DashMap::new(),
        }
    }

    /// Create a registry with the built-in feature quotas.
    pub fn with_default_policies(store: Arc<dyn RateLimitStore>) -> Self {
        Self::new(store, default_policies())
    }

    /// Attach an observer to every limiter built from a policy.
    pub fn with_observer(mut self, observer: Arc<dyn LimitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use `clock` for reset times of limiters built from a policy.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the limiter for `name`, building it on first access.
    pub fn get(&self, name: &str) -> Result<Arc<RateLimiter>> {
        if let Some(limiter) = self.limiters.get(name) {
            return Ok(limiter.clone());
        }

        let policy = self
            .policies
            .get(name)
            .ok_or_else(|| QuotagateError::Config(format!("unknown limiter '{}'", name)))?;

        // The vacant entry holds the shard lock, so racing callers wait here
        // and then observe the occupied entry.
        match self.limiters.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(self.build(name, policy)?);
                debug!(limiter = %name, "Registered rate limiter");
                entry.insert(limiter.clone());
                Ok(limiter)
            }
        }
    }

    /// Register a limiter with a hand-built configuration.
    ///
    /// Fails if `name` is already registered or has a policy.
    pub fn register(&self, name: &str, config: RateLimitConfig) -> Result<Arc<RateLimiter>> {
        if self.policies.contains_key(name) {
            return Err(QuotagateError::Config(format!(
                "limiter '{}' is already defined by a policy",
                name
            )));
        }

        match self.limiters.entry(name.to_string()) {
            Entry::Occupied(_) => Err(QuotagateError::Config(format!(
                "limiter '{}' is already registered",
                name
            ))),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(RateLimiter::with_clock(
                    name,
                    config,
                    self.store.clone(),
                    self.clock.clone(),
                )?);
                entry.insert(limiter.clone());
                Ok(limiter)
            }
        }
    }

    /// Look up `name` and check `identifier` against it.
    pub async fn check(&self, name: &str, identifier: &str) -> Result<RateLimitDecision> {
        let limiter = self.get(name)?;
        Ok(limiter.check_limit(identifier).await)
    }

    /// Build every configured limiter now, surfacing configuration errors.
    pub fn preload(&self) -> Result<()> {
        for name in self.policies.keys() {
            self.get(name)?;
        }
        info!(count = self.policies.len(), "Preloaded rate limiters");
        Ok(())
    }

    /// Configured policy names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// The policy behind `name`, if any.
    pub fn policy(&self, name: &str) -> Option<&LimiterPolicy> {
        self.policies.get(name)
    }

    /// Number of limiters constructed so far.
    pub fn active_count(&self) -> usize {
        self.limiters.len()
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    fn build(&self, name: &str, policy: &LimiterPolicy) -> Result<RateLimiter> {
        let mut config = RateLimitConfig::from_policy(policy);
        if let Some(observer) = &self.observer {
            config = config.with_observer(observer.clone());
        }
        RateLimiter::with_clock(name, config, self.store.clone(), self.clock.clone())
    }
}
