//! Event-rate limiting.

mod limiter;

pub use limiter::{EnqueueError, LimiterState, RateLimiter};
