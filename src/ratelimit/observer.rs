//! Denial event publishing.
//!
//! A limiter notifies its observer every time it denies a request. Observers
//! are side-effect hooks for metrics and alerting; they never influence the
//! decision.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use super::record::RateLimitInfo;

/// A denial published by a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitEvent {
    /// Name of the limiter that denied the request
    pub limiter: String,
    /// Quota details at the time of denial
    pub info: RateLimitInfo,
}

/// Receives denial events.
pub trait LimitObserver: Send + Sync {
    /// Called after a request has been denied.
    fn on_limit_reached(&self, event: &LimitEvent);
}

/// Logs each denial at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LimitObserver for TracingObserver {
    fn on_limit_reached(&self, event: &LimitEvent) {
        info!(
            limiter = %event.limiter,
            identifier = %event.info.identifier,
            limit = event.info.limit,
            retry_after = event.info.retry_after,
            "Rate limit reached"
        );
    }
}

/// Forwards denials into an unbounded tokio channel.
///
/// The channel grows while the receiver lags; prefer
/// [`BoundedChannelObserver`] when the consumer may stall.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<LimitEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LimitEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl LimitObserver for ChannelObserver {
    fn on_limit_reached(&self, event: &LimitEvent) {
        if self.sender.send(event.clone()).is_err() {
            warn!(limiter = %event.limiter, "Limit event receiver dropped");
        }
    }
}

/// Forwards denials into a bounded tokio channel.
///
/// Never waits for capacity: events that arrive while the channel is full
/// are dropped with a warning.
#[derive(Debug, Clone)]
pub struct BoundedChannelObserver {
    sender: mpsc::Sender<LimitEvent>,
}

impl BoundedChannelObserver {
    /// Create an observer buffering at most `capacity` events.
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LimitEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl LimitObserver for BoundedChannelObserver {
    fn on_limit_reached(&self, event: &LimitEvent) {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(limiter = %event.limiter, "Limit event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(limiter = %event.limiter, "Limit event receiver dropped");
            }
        }
    }
}
