//! Rate limiting logic and state management.

mod backend;
mod clock;
mod distributed;
mod key;
mod limiter;
mod memory;
mod observer;
mod record;
mod registry;
mod rules;

pub use backend::{RateLimitStore, StoreError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::{DistributedStore, DistributedStoreConfig};
pub use key::{validate_limiter_name, KeyGenerator, PrefixedKey, KEY_SEPARATOR};
pub use limiter::{RateLimitConfig, RateLimiter, MAX_WINDOW};
pub use memory::{MemoryStore, DEFAULT_SWEEP_INTERVAL};
pub use observer::{
    BoundedChannelObserver, ChannelObserver, LimitEvent, LimitObserver, TracingObserver,
};
pub use record::{RateLimitDecision, RateLimitInfo, RateLimitRecord};
pub use registry::LimiterRegistry;
pub use rules::{default_policies, FailurePolicy, LimiterPolicy, TimeUnit, WindowSpec};
