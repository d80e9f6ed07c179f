//! The request pipeline.
//!
//! Per request, strictly ordered and terminal on first rejection:
//! validate, identify the caller, consult the rate limiter (through the
//! idempotency tracker when a request id is present), then on admission
//! serve from cache or forward through the retrying client. Denied requests
//! do no cache or upstream work.

use std::sync::Arc;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{cache_key, CachedResponse, ResponseCache};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::store::{CacheStore, CounterStore};
use crate::upstream::{RetryingClient, Upstream, UpstreamRequest};

use super::headers::{apply_quota_headers, IDEMPOTENCY_KEY, X_CACHE};

/// Request headers that are never forwarded upstream.
const STRIPPED_REQUEST_HEADERS: [&str; 2] = ["host", "connection"];

/// The admission-control pipeline for one gateway instance.
pub struct Pipeline {
    config: Arc<GatewayConfig>,
    limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryingClient,
    upstream: Arc<dyn Upstream>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Wire a pipeline from its collaborators.
    pub fn new(
        config: Arc<GatewayConfig>,
        counter_store: Arc<dyn CounterStore>,
        cache_store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(counter_store, Arc::clone(&config), Arc::clone(&clock));
        let cache = ResponseCache::new(cache_store, Arc::clone(&clock));
        let retry = RetryingClient::new(&config.retry);
        Self {
            config,
            limiter,
            cache,
            retry,
            upstream,
            clock,
        }
    }

    /// Process one inbound request to a final response.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let correlation_id = Uuid::new_v4();
        debug!(
            %correlation_id,
            method = %request.method(),
            path = request.uri().path(),
            "request received"
        );

        // Cheapest check first: malformed input never reaches the stores.
        if let Err(e) = validate(&request) {
            return self.error_response(&e, None);
        }

        let caller = match self.identify(&request) {
            Ok(caller) => caller,
            Err(e) => return self.error_response(&e, None),
        };

        let class = self
            .config
            .route_class(request.method().as_str(), request.uri().path());
        let request_id = request
            .headers()
            .get(IDEMPOTENCY_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let decision = match class {
            Some(class) => {
                self.limiter
                    .evaluate(&caller, class, request_id.as_deref())
                    .await
            }
            None => {
                debug!(%correlation_id, "no route matched, forwarding unthrottled");
                RateDecision::unenforced(self.clock.epoch_ms())
            }
        };

        if !decision.allowed {
            info!(
                %correlation_id,
                caller = %caller,
                class = class.unwrap_or("-"),
                retry_after = ?decision.retry_after_secs,
                "request denied by rate limiter"
            );
            let denial = GatewayError::QuotaExceeded {
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            };
            return self.error_response(&denial, Some(&decision));
        }

        match self.dispatch(&request, class).await {
            Ok(response) => {
                debug!(
                    %correlation_id,
                    status = response.status.as_u16(),
                    cache = ?response.cache_status,
                    "request served"
                );
                self.build_response(response, &decision)
            }
            Err(e) => {
                warn!(%correlation_id, error = %e, "upstream dispatch failed");
                self.error_response(&e, Some(&decision))
            }
        }
    }

    /// Derive the caller identity from the trusted edge-assigned header.
    ///
    /// The server layer overwrites this header from the connection itself;
    /// client-supplied forwarding headers are never consulted, since a
    /// spoofable identity defeats the limiter entirely.
    fn identify(&self, request: &Request<Bytes>) -> Result<String> {
        let header = &self.config.server.identity_header;
        request
            .headers()
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidRequest {
                status: 400,
                reason: "missing client identity".to_string(),
            })
    }

    /// Serve the admitted request, layering caching over the retried
    /// upstream call: a cache miss triggers a retried call, a cache hit
    /// never invokes retry logic at all.
    async fn dispatch(
        &self,
        request: &Request<Bytes>,
        class: Option<&str>,
    ) -> Result<CachedResponse> {
        let upstream_request = self.to_upstream_request(request);

        let cache_ttl = class
            .and_then(|c| self.config.endpoint_class(c))
            .map(|c| c.cache_ttl_secs)
            .unwrap_or(0);
        let cacheable =
            matches!(*request.method(), Method::GET | Method::HEAD) && cache_ttl > 0;

        if cacheable {
            let key = cache_key(request.method(), request.uri());
            self.cache
                .fetch_cached(&key, cache_ttl, || {
                    self.retry
                        .call_with_retry(|| self.upstream.fetch(&upstream_request))
                })
                .await
        } else {
            let response = self
                .retry
                .call_with_retry(|| self.upstream.fetch(&upstream_request))
                .await?;
            Ok(CachedResponse::passthrough(response))
        }
    }

    fn to_upstream_request(&self, request: &Request<Bytes>) -> UpstreamRequest {
        let identity_header = self.config.server.identity_header.as_str();
        let mut headers = http::HeaderMap::new();
        for (name, value) in request.headers() {
            let name_str = name.as_str();
            if name_str.eq_ignore_ascii_case(identity_header)
                || STRIPPED_REQUEST_HEADERS
                    .iter()
                    .any(|h| name_str.eq_ignore_ascii_case(h))
            {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        UpstreamRequest {
            method: request.method().clone(),
            path_and_query,
            headers,
            body: request.body().clone(),
        }
    }

    fn build_response(
        &self,
        served: CachedResponse,
        decision: &RateDecision,
    ) -> Response<Bytes> {
        let mut response = Response::new(served.body);
        *response.status_mut() = served.status;
        *response.headers_mut() = served.headers;

        apply_quota_headers(response.headers_mut(), decision);
        if let Some(cache_status) = served.cache_status {
            let value = match cache_status {
                crate::cache::CacheStatus::Hit => HeaderValue::from_static("HIT"),
                crate::cache::CacheStatus::Miss => HeaderValue::from_static("MISS"),
            };
            response
                .headers_mut()
                .insert(HeaderName::from_static(X_CACHE), value);
        }

        response
    }

    /// Translate a taxonomy error into an outbound response. Denial and
    /// unavailability get distinct codes and messages, and upstream error
    /// bodies are never echoed.
    fn error_response(
        &self,
        error: &GatewayError,
        decision: Option<&RateDecision>,
    ) -> Response<Bytes> {
        let (status, code, message) = match error {
            GatewayError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exceeded",
                "request rate limit exceeded for this window".to_string(),
            ),
            GatewayError::InvalidRequest { status, reason } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                "invalid_request",
                reason.clone(),
            ),
            GatewayError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "the gateway is temporarily unable to process requests".to_string(),
            ),
            GatewayError::UpstreamUnavailable(_) | GatewayError::Exhausted { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream_unavailable",
                "the upstream service is temporarily unavailable".to_string(),
            ),
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Server(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error".to_string(),
            ),
        };

        let mut body = serde_json::json!({
            "error": code,
            "message": message,
        });
        if let GatewayError::QuotaExceeded { retry_after_secs } = error {
            body["retry_after_secs"] = serde_json::json!(retry_after_secs);
        }
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = Response::new(Bytes::from(body_bytes));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(decision) = decision {
            apply_quota_headers(response.headers_mut(), decision);
        }
        if let GatewayError::QuotaExceeded { retry_after_secs } = error {
            response.headers_mut().insert(
                http::header::RETRY_AFTER,
                HeaderValue::from(*retry_after_secs),
            );
        }

        response
    }
}

/// Reject malformed input before any store or upstream interaction.
fn validate(request: &Request<Bytes>) -> Result<()> {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if mutating && !request.body().is_empty() {
        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("application/json")
            })
            .unwrap_or(false);
        if !is_json {
            return Err(GatewayError::InvalidRequest {
                status: 415,
                reason: "mutating requests must carry an application/json body".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EndpointClassConfig, RouteRule, StoreErrorPolicy};
    use crate::store::{InMemoryCacheStore, InMemoryCounterStore};
    use crate::upstream::UpstreamResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct MockUpstream {
        status: StatusCode,
        body: &'static [u8],
        calls: AtomicU32,
    }

    impl MockUpstream {
        fn new(status: u16, body: &'static [u8]) -> Self {
            Self {
                status: StatusCode::from_u16(status).unwrap(),
                body,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn fetch(&self, _request: &UpstreamRequest) -> Result<UpstreamResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut headers = http::HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(UpstreamResponse {
                status: self.status,
                headers,
                body: Bytes::from_static(self.body),
            })
        }
    }

    fn test_config() -> Arc<GatewayConfig> {
        let mut classes = HashMap::new();
        classes.insert(
            "submit".to_string(),
            EndpointClassConfig {
                limit: 2,
                window_secs: 3600,
                cache_ttl_secs: 0,
                on_store_error: StoreErrorPolicy::Deny,
            },
        );
        classes.insert(
            "read".to_string(),
            EndpointClassConfig {
                limit: 100,
                window_secs: 60,
                cache_ttl_secs: 300,
                on_store_error: StoreErrorPolicy::Allow,
            },
        );
        Arc::new(GatewayConfig {
            endpoint_classes: classes,
            routes: vec![
                RouteRule {
                    method: Some("POST".to_string()),
                    prefix: "/api/submit".to_string(),
                    class: "submit".to_string(),
                },
                RouteRule {
                    method: None,
                    prefix: "/api/".to_string(),
                    class: "read".to_string(),
                },
            ],
            ..GatewayConfig::default()
        })
    }

    fn test_pipeline(upstream: Arc<MockUpstream>) -> (Arc<ManualClock>, Pipeline) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let config = test_config();
        let counter_store = Arc::new(InMemoryCounterStore::new(clock.clone()));
        let cache_store = Arc::new(InMemoryCacheStore::new());
        let pipeline = Pipeline::new(config, counter_store, cache_store, upstream, clock.clone());
        (clock, pipeline)
    }

    fn request(method: &str, path: &str, identity: Option<&str>, body: &'static [u8]) -> Request<Bytes> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(identity) = identity {
            builder = builder.header("x-edge-client-id", identity);
        }
        if !body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder.body(Bytes::from_static(body)).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_request_carries_quota_headers() {
        let upstream = Arc::new(MockUpstream::new(200, b"{\"ok\":true}"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let response = pipeline
            .handle(request("POST", "/api/submit", Some("ip1"), b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "1");
        assert!(response.headers().get("x-ratelimit-reset").is_some());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_request_is_terminal() {
        let upstream = Arc::new(MockUpstream::new(200, b"{}"));
        let (clock, pipeline) = test_pipeline(upstream.clone());

        for _ in 0..2 {
            let ok = pipeline
                .handle(request("POST", "/api/submit", Some("ip1"), b"{}"))
                .await;
            assert_eq!(ok.status(), StatusCode::OK);
            clock.advance(Duration::from_secs(1));
        }

        let denied = pipeline
            .handle(request("POST", "/api/submit", Some("ip1"), b"{}"))
            .await;

        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(denied.headers().get("retry-after").is_some());
        assert_eq!(denied.headers().get("x-ratelimit-remaining").unwrap(), "0");
        let body: serde_json::Value = serde_json::from_slice(denied.body()).unwrap();
        assert_eq!(body["error"], "quota_exceeded");
        assert!(body["retry_after_secs"].as_u64().unwrap() > 0);
        // No upstream work was performed for the denied request
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_rejected_before_any_work() {
        let upstream = Arc::new(MockUpstream::new(200, b"{}"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let response = pipeline
            .handle(request("GET", "/api/releases", None, b""))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_json_mutating_body_gets_415() {
        let upstream = Arc::new(MockUpstream::new(200, b"{}"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/api/submit")
            .header("x-edge-client-id", "ip1")
            .header(CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"not json"))
            .unwrap();
        let response = pipeline.handle(req).await;

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_path_is_cached() {
        let upstream = Arc::new(MockUpstream::new(200, b"[1,2,3]"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let first = pipeline
            .handle(request("GET", "/api/releases", Some("ip1"), b""))
            .await;
        assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
        settle().await;

        // A different caller hits the shared cache entry
        let second = pipeline
            .handle(request("GET", "/api/releases", Some("ip2"), b""))
            .await;
        assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
        assert_eq!(second.body(), &Bytes::from_static(b"[1,2,3]"));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutating_requests_bypass_cache() {
        let upstream = Arc::new(MockUpstream::new(200, b"{}"));
        let (clock, pipeline) = test_pipeline(upstream.clone());

        for _ in 0..2 {
            let response = pipeline
                .handle(request("POST", "/api/submit", Some("ip1"), b"{}"))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-cache").is_none());
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_exhaustion_maps_to_generic_503() {
        let upstream = Arc::new(MockUpstream::new(503, b"secret upstream diagnostic"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let response = pipeline
            .handle(request("POST", "/api/submit", Some("ip1"), b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // Retries were attempted before giving up
        assert_eq!(upstream.calls(), 3);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(!body.contains("secret upstream diagnostic"));
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["error"], "upstream_unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_replay_through_pipeline() {
        let upstream = Arc::new(MockUpstream::new(200, b"{}"));
        let (clock, pipeline) = test_pipeline(upstream.clone());

        let make = |id: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/api/submit")
                .header("x-edge-client-id", "ip1")
                .header("idempotency-key", id)
                .header(CONTENT_TYPE, "application/json")
                .body(Bytes::from_static(b"{}"))
                .unwrap()
        };

        let first = pipeline.handle(make("dup-1")).await;
        assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "1");

        clock.advance(Duration::from_secs(1));
        let replay = pipeline.handle(make("dup-1")).await;
        assert_eq!(replay.headers().get("x-ratelimit-remaining").unwrap(), "1");

        clock.advance(Duration::from_secs(1));
        let fresh = pipeline.handle(make("dup-2")).await;
        assert_eq!(fresh.headers().get("x-ratelimit-remaining").unwrap(), "0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_path_forwards_unthrottled() {
        let upstream = Arc::new(MockUpstream::new(200, b"ok"));
        let (_clock, pipeline) = test_pipeline(upstream.clone());

        let response = pipeline
            .handle(request("GET", "/health", Some("ip1"), b""))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "0");
        assert!(response.headers().get("x-cache").is_none());
        assert_eq!(upstream.calls(), 1);
    }
}
