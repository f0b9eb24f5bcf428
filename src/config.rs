//! Configuration management for Quotagate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{QuotagateError, Result};
use crate::ratelimit::{
    default_policies, DistributedStore, DistributedStoreConfig, LimiterPolicy, LimiterRegistry,
    MemoryStore, RateLimitStore,
};

/// Prefix for environment variable overrides (`QUOTAGATE__STORE__URL`).
pub const ENV_PREFIX: &str = "QUOTAGATE";

/// Main configuration for the Quotagate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotagateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Named quota policies; the built-in table is used when empty
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterPolicy>,

    /// Response header configuration
    #[serde(default)]
    pub headers: HeaderConfig,
}

/// Which store backs the limiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Single-process store
    Memory {
        /// Seconds between expiry sweeps
        #[serde(default = "default_sweep_interval")]
        sweep_interval_secs: u64,
    },
    /// Redis store shared by every instance
    Redis {
        /// Redis connection URL
        url: String,
        /// Prefix for every key written
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Bound on each store round-trip in milliseconds
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "quotagate".to_string()
}

fn default_timeout_ms() -> u64 {
    1500
}

/// Response header configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Attach informational headers to allowed responses
    #[serde(default = "default_on_allow")]
    pub on_allow: bool,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            on_allow: default_on_allow(),
        }
    }
}

fn default_on_allow() -> bool {
    true
}

impl QuotagateConfig {
    /// Load configuration from an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotagateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Configured policies, falling back to the built-in table.
    pub fn policies(&self) -> BTreeMap<String, LimiterPolicy> {
        if self.limiters.is_empty() {
            default_policies()
        } else {
            self.limiters.clone()
        }
    }

    /// Build the configured store.
    ///
    /// The memory store starts its sweeper immediately, see [`memory_store`].
    pub async fn connect_store(&self) -> Result<Arc<dyn RateLimitStore>> {
        match &self.store {
            StoreConfig::Memory {
                sweep_interval_secs,
            } => memory_store(*sweep_interval_secs),
            StoreConfig::Redis {
                url,
                key_prefix,
                timeout_ms,
            } => {
                let store = DistributedStore::connect(DistributedStoreConfig {
                    url: url.clone(),
                    key_prefix: key_prefix.clone(),
                    timeout: Duration::from_millis(*timeout_ms),
                })
                .await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Build a registry over `store` with the configured policies.
    pub fn registry(&self, store: Arc<dyn RateLimitStore>) -> Result<LimiterRegistry> {
        let registry = LimiterRegistry::new(store, self.policies());
        registry.preload()?;
        Ok(registry)
    }
}

/// A memory store with its sweeper running.
///
/// The sweeper is a tokio task, so this fails with [`QuotagateError::Config`]
/// when called outside a runtime. An interval of zero selects
/// [`DEFAULT_SWEEP_INTERVAL`](crate::ratelimit::DEFAULT_SWEEP_INTERVAL).
pub fn memory_store(sweep_interval_secs: u64) -> Result<Arc<dyn RateLimitStore>> {
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(QuotagateError::Config(
            "the memory store sweeper needs a running tokio runtime".to_string(),
        ));
    }

    let interval = match sweep_interval_secs {
        0 => crate::ratelimit::DEFAULT_SWEEP_INTERVAL,
        secs => Duration::from_secs(secs),
    };
    let store = Arc::new(MemoryStore::new());
    store.spawn_sweeper(interval);
    Ok(store)
}
