//! Rate limit response headers.

use serde::Serialize;

use crate::ratelimit::RateLimitInfo;

pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
pub const RETRY_AFTER: &str = "Retry-After";

/// Header values derived from a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds
    pub reset: i64,
    /// Present only on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Informational headers for an allowed request.
    pub fn informational(info: &RateLimitInfo) -> Self {
        Self {
            limit: info.limit,
            remaining: info.remaining,
            reset: info.reset_epoch_secs(),
            retry_after: None,
        }
    }

    /// Headers for a denied request, including `Retry-After`.
    pub fn throttled(info: &RateLimitInfo) -> Self {
        Self {
            retry_after: Some(info.retry_after),
            ..Self::informational(info)
        }
    }

    /// Name/value pairs ready to be written to a response.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (RATE_LIMIT_LIMIT, self.limit.to_string()),
            (RATE_LIMIT_REMAINING, self.remaining.to_string()),
            (RATE_LIMIT_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}
