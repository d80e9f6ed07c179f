//! Upstream call abstraction and the retrying client around it.
//!
//! The core does not know what the upstream resource means; it only relies
//! on the status-code contract (2xx/4xx pass through, 429 and 5xx are
//! transient).

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::Result;

mod http_client;
mod retry;

pub use http_client::HttpUpstream;
pub use retry::RetryingClient;

/// A request forwarded to the upstream resource.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Path and query, relative to the upstream base
    pub path_and_query: String,
    /// Forwarded request headers (hop-by-hop and identity headers already
    /// stripped by the pipeline)
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// A response from the upstream resource.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers as received
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// Capability for performing a single upstream call.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Perform one HTTP exchange with the upstream.
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse>;
}
