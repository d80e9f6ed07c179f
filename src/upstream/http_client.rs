//! hyper-backed upstream implementation for the demo binary.

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client};

use crate::error::{GatewayError, Result};

use super::{Upstream, UpstreamRequest, UpstreamResponse};

/// Forwards upstream requests to a configured base URL over plain HTTP.
pub struct HttpUpstream {
    client: Client<HttpConnector>,
    base_url: String,
}

impl HttpUpstream {
    /// Create an upstream client targeting `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn target_uri(&self, path_and_query: &str) -> Result<http::Uri> {
        format!("{}{}", self.base_url, path_and_query)
            .parse()
            .map_err(|e: http::uri::InvalidUri| {
                GatewayError::UpstreamUnavailable(format!("invalid upstream uri: {}", e))
            })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let uri = self.target_uri(&request.path_and_query)?;

        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in request.headers.iter() {
                headers.insert(name, value.clone());
            }
        }
        let outbound = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
