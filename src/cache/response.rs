//! Cache-aside wrapper around upstream fetches.

use std::future::Future;
use std::sync::Arc;
use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::CacheStore;
use crate::upstream::UpstreamResponse;

use super::entry::CacheEntry;

/// Whether a response was served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Hit => write!(f, "HIT"),
            CacheStatus::Miss => write!(f, "MISS"),
        }
    }
}

/// A response routed through (or around) the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers to serve
    pub headers: http::HeaderMap,
    /// Response body
    pub body: Bytes,
    /// HIT/MISS when the cache was consulted, `None` on bypass
    pub cache_status: Option<CacheStatus>,
}

impl CachedResponse {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
            headers: entry.header_map(),
            body: Bytes::from(entry.body.clone()),
            cache_status: Some(CacheStatus::Hit),
        }
    }

    fn miss(response: UpstreamResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            cache_status: Some(CacheStatus::Miss),
        }
    }

    /// Wrap an upstream response that never touched the cache.
    pub fn passthrough(response: UpstreamResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            cache_status: None,
        }
    }
}

/// Derive the cache key for a request.
///
/// The key covers exactly the request parts that affect the response:
/// method and normalized URL (query parameters sorted, trailing slash
/// stripped). Caller identity and volatile headers are deliberately
/// excluded so the cache is shared across callers and hit rate is not
/// destroyed by client variance.
pub fn cache_key(method: &Method, uri: &Uri) -> String {
    let mut path = uri.path().trim_end_matches('/');
    if path.is_empty() {
        path = "/";
    }

    match uri.query() {
        Some(query) if !query.is_empty() => {
            let mut params: Vec<&str> = query.split('&').collect();
            params.sort_unstable();
            format!("{} {}?{}", method, path, params.join("&"))
        }
        _ => format!("{} {}", method, path),
    }
}

/// Cache-aside wrapper: check the cache, and on a miss run the supplied
/// fetch operation and populate the cache in the background.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a response cache over the given store.
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Serve `cache_key` from the cache, or invoke `fetch` and cache the
    /// result.
    ///
    /// Only a status-200 fetch result is stored, with allowlisted headers.
    /// The store write is fire-and-forget: the response path never blocks
    /// on cache population.
    pub async fn fetch_cached<F, Fut>(
        &self,
        cache_key: &str,
        ttl_secs: u64,
        fetch: F,
    ) -> Result<CachedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<UpstreamResponse>>,
    {
        let now = self.clock.epoch_secs();

        if let Some(entry) = self.store.match_entry(cache_key).await {
            if entry.is_fresh(now) {
                trace!(key = cache_key, "cache hit");
                return Ok(CachedResponse::from_entry(&entry));
            }
            trace!(key = cache_key, "cache entry stale");
        }

        let response = fetch().await?;

        if response.status == StatusCode::OK && ttl_secs > 0 {
            let entry = CacheEntry::from_response(&response, now, ttl_secs);
            let store = Arc::clone(&self.store);
            let key = cache_key.to_string();
            tokio::spawn(async move {
                if let Err(e) = store.put(&key, entry).await {
                    warn!(key = %key, error = %e, "cache store write failed");
                }
            });
        }

        Ok(CachedResponse::miss(response))
    }
}
