//! Per-key counter state and per-call decision types.

use serde::{Deserialize, Serialize};

/// Sliding-window state for a single storage key.
///
/// Owned and mutated only by a store's atomic increment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Number of requests currently inside the window
    pub count: u64,
    /// Epoch milliseconds after which the record holds no live requests
    pub reset_time: i64,
    /// Arrival times (epoch milliseconds) of the requests inside the window
    pub request_timestamps: Vec<i64>,
}

impl RateLimitRecord {
    /// Drop timestamps at or before `now - window_ms`, record `now`, and
    /// refresh `count` and `reset_time`.
    pub(crate) fn slide_and_push(&mut self, now: i64, window_ms: i64) -> u64 {
        let cutoff = now.saturating_sub(window_ms);
        self.request_timestamps.retain(|&ts| ts > cutoff);
        self.request_timestamps.push(now);
        self.count = self.request_timestamps.len() as u64;
        self.reset_time = now.saturating_add(window_ms);
        self.count
    }

    /// Whether every request in this record has aged out.
    pub fn is_expired(&self, now: i64) -> bool {
        self.reset_time < now
    }
}

/// Quota details reported alongside every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// The caller-supplied identifier
    pub identifier: String,
    /// Maximum requests per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds when the window fully resets
    pub reset_time: i64,
    /// Seconds to wait before retrying (0 when allowed)
    pub retry_after: u64,
}

impl RateLimitInfo {
    /// Reset time rounded up to whole epoch seconds.
    pub fn reset_epoch_secs(&self) -> i64 {
        (self.reset_time + 999).div_euclid(1000)
    }
}

/// The outcome of a single `check_limit` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Quota details
    pub info: RateLimitInfo,
}
