//! Quotagate - Sliding-Window Admission Control
//!
//! This crate throttles requests per identifier within a sliding time window.
//! Counters live behind a [`ratelimit::RateLimitStore`], either in-process or
//! in a shared Redis backend so that many stateless instances enforce one quota.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
