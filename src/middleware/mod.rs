//! Adapter from limiter decisions to protocol-level response metadata.
//!
//! Everything here is a pure function of a [`RateLimitDecision`]; rendering
//! the metadata onto an actual response is left to the hosting framework.

mod headers;

pub use headers::{
    RateLimitHeaders, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET, RETRY_AFTER,
};

use serde::Serialize;

use crate::ratelimit::RateLimitDecision;

/// HTTP status for throttled requests.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// A denial the caller should render as a throttling response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Throttled {
    pub status: u16,
    pub retry_after: u64,
    pub message: String,
    pub headers: RateLimitHeaders,
}

/// What the hosting layer should attach to its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResponseMetadata {
    /// Let the request through, optionally with informational headers.
    Allowed { headers: Option<RateLimitHeaders> },
    /// Reject the request.
    Throttled(Throttled),
}

impl ResponseMetadata {
    /// Convert a decision. `headers_on_allow` controls whether allowed
    /// requests carry informational headers.
    pub fn from_decision(decision: &RateLimitDecision, headers_on_allow: bool) -> Self {
        let info = &decision.info;

        if decision.allowed {
            return ResponseMetadata::Allowed {
                headers: headers_on_allow.then(|| RateLimitHeaders::informational(info)),
            };
        }

        ResponseMetadata::Throttled(Throttled {
            status: TOO_MANY_REQUESTS,
            retry_after: info.retry_after,
            message: format!(
                "Rate limit exceeded. Try again in {} seconds.",
                info.retry_after
            ),
            headers: RateLimitHeaders::throttled(info),
        })
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, ResponseMetadata::Allowed { .. })
    }

    /// Header pairs to write, empty when none apply.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            ResponseMetadata::Allowed { headers } => {
                headers.as_ref().map(RateLimitHeaders::to_pairs).unwrap_or_default()
            }
            ResponseMetadata::Throttled(throttled) => throttled.headers.to_pairs(),
        }
    }
}
