//! Sliding-window rate limiting over a shared counter store.

mod decision;
mod idempotency;
mod key;
mod limiter;

pub use decision::{CounterRecord, RateDecision};
pub use idempotency::{IdempotencyRecord, IdempotencyTracker};
pub use key::WindowKey;
pub use limiter::RateLimiter;
