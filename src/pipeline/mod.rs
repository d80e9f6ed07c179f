//! Per-request orchestration: identify, rate-check, cache, forward, respond.

mod handler;
mod headers;

pub use handler::Pipeline;
pub use headers::{IDEMPOTENCY_KEY, X_CACHE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
