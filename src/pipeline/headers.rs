//! Quota and diagnostic header names and attachment.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::ratelimit::RateDecision;

/// Class limit the decision was made against.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Requests left in the caller's window.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Window reset time, epoch seconds.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
/// Cache routing diagnostic, HIT or MISS.
pub const X_CACHE: &str = "x-cache";
/// Client-supplied (advisory) duplicate-suppression key.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Attach quota headers so callers can self-throttle. Applied to every
/// response, admitted or denied.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_RESET),
        HeaderValue::from(decision.reset_at_secs()),
    );
}
