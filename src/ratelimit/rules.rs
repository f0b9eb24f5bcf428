//! Quota policy definitions.
//!
//! Policies are the serializable description of a named limiter: how many
//! requests, over which window, and how to behave when the store fails.
//! Windows may be written as raw milliseconds or as a named unit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Time unit for windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// A window length, either in milliseconds or as a named unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowSpec {
    Millis(u64),
    Unit(TimeUnit),
}

impl WindowSpec {
    /// Get the window as a duration.
    pub fn duration(&self) -> Duration {
        match self {
            WindowSpec::Millis(ms) => Duration::from_millis(*ms),
            WindowSpec::Unit(unit) => unit.duration(),
        }
    }
}

impl From<TimeUnit> for WindowSpec {
    fn from(unit: TimeUnit) -> Self {
        WindowSpec::Unit(unit)
    }
}

/// What a limiter does when its store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FailurePolicy {
    /// Always allow with full quota reported.
    #[default]
    FailOpen,
    /// Allow until this many consecutive store failures, then deny until
    /// the store recovers.
    FailClosedAfter { consecutive_failures: u32 },
}

/// A single named quota policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterPolicy {
    /// Requests allowed per window
    pub requests_per_window: u64,
    /// Window length
    pub window: WindowSpec,
    /// Store failure behaviour
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl LimiterPolicy {
    /// Create a fail-open policy.
    pub fn new(requests_per_window: u64, window: impl Into<WindowSpec>) -> Self {
        Self {
            requests_per_window,
            window: window.into(),
            failure_policy: FailurePolicy::FailOpen,
        }
    }
}

/// The built-in feature quotas.
pub fn default_policies() -> BTreeMap<String, LimiterPolicy> {
    [
        ("translation-free", LimiterPolicy::new(100, TimeUnit::Hour)),
        ("translation-premium", LimiterPolicy::new(500, TimeUnit::Hour)),
        ("summary-free", LimiterPolicy::new(5, TimeUnit::Day)),
        ("summary-premium", LimiterPolicy::new(50, TimeUnit::Day)),
        ("billing-portal", LimiterPolicy::new(5, TimeUnit::Minute)),
        ("counterpoints-free", LimiterPolicy::new(1, TimeUnit::Day)),
        ("counterpoints-premium", LimiterPolicy::new(10, TimeUnit::Day)),
    ]
    .into_iter()
    .map(|(name, policy)| (name.to_string(), policy))
    .collect()
}
