//! Cached response entries and the response-header allowlist.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::upstream::UpstreamResponse;

/// Response headers that may be persisted into a cache entry.
///
/// This is a security boundary, not a style preference: copying arbitrary
/// upstream headers would let an upstream response smuggle cache-poisoning
/// headers (Location, Set-Cookie) into a response later served to unrelated
/// callers. Only content metadata and validators survive.
pub const CACHEABLE_RESPONSE_HEADERS: [&str; 4] =
    ["content-type", "content-length", "etag", "last-modified"];

/// A stored upstream response.
///
/// Created whole on a successful fetch, expired by TTL, never partially
/// updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// HTTP status at store time (always 200 under current policy)
    pub status: u16,
    /// Allowlisted headers plus the synthesized Cache-Control directive
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
    /// Epoch seconds when the entry was stored
    pub stored_at: u64,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Build an entry from an upstream response, keeping only allowlisted
    /// headers and attaching a `Cache-Control` directive for the TTL.
    pub fn from_response(response: &UpstreamResponse, stored_at: u64, ttl_secs: u64) -> Self {
        let mut headers = Vec::new();
        for name in CACHEABLE_RESPONSE_HEADERS {
            if let Some(value) = response.headers.get(name) {
                if let Ok(value) = value.to_str() {
                    headers.push((name.to_string(), value.to_string()));
                }
            }
        }
        headers.push((
            "cache-control".to_string(),
            format!("public, max-age={}", ttl_secs),
        ));

        Self {
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            stored_at,
            ttl_secs,
        }
    }

    /// Whether the entry is still within its TTL at `now`.
    pub fn is_fresh(&self, now: u64) -> bool {
        now < self.stored_at + self.ttl_secs
    }

    /// Reconstruct the stored headers. Entries written by a different
    /// deployment revision may hold names or values that no longer parse;
    /// those are skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        map
    }
}
