//! HTTP server implementation.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use http::header::{HeaderName, HeaderValue};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use tracing::{error, info, warn};

use crate::error::{GatewayError, Result};
use crate::pipeline::Pipeline;

/// HTTP server fronting the admission pipeline.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The pipeline instance
    pipeline: Arc<Pipeline>,
    /// Trusted identity header injected per connection
    identity_header: String,
}

impl HttpServer {
    /// Create a new HTTP server around a pipeline.
    pub fn new(addr: SocketAddr, pipeline: Arc<Pipeline>, identity_header: String) -> Self {
        Self {
            addr,
            pipeline,
            identity_header,
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let identity_header = HeaderName::from_bytes(self.identity_header.as_bytes())
            .map_err(|e| GatewayError::Config(format!("invalid identity header name: {}", e)))?;
        let pipeline = self.pipeline;

        info!(addr = %self.addr, "Starting HTTP server for admission pipeline");

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote = conn.remote_addr();
            let pipeline = Arc::clone(&pipeline);
            let identity_header = identity_header.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request: hyper::Request<Body>| {
                    let pipeline = Arc::clone(&pipeline);
                    let identity_header = identity_header.clone();
                    async move {
                        let response =
                            dispatch(&pipeline, identity_header, remote, request).await;
                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });

        Server::bind(&self.addr)
            .serve(make_svc)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatewayError::Server(e.to_string())
            })
    }
}

/// Buffer the request body and run it through the pipeline.
///
/// The caller identity header is set from the connection's peer address
/// before the pipeline sees the request; any client-supplied value is
/// overwritten, so a spoofed forwarding header can never change who the
/// rate limiter charges.
async fn dispatch(
    pipeline: &Pipeline,
    identity_header: HeaderName,
    remote: SocketAddr,
    request: hyper::Request<Body>,
) -> hyper::Response<Body> {
    let (mut parts, body) = request.into_parts();
    let body = match hyper::body::to_bytes(body).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to buffer request body");
            let mut response = hyper::Response::new(Body::from(r#"{"error":"invalid_request"}"#));
            *response.status_mut() = http::StatusCode::BAD_REQUEST;
            return response;
        }
    };

    let identity = remote.ip().to_string();
    match HeaderValue::from_str(&identity) {
        Ok(value) => {
            parts.headers.insert(identity_header, value);
        }
        Err(e) => {
            warn!(error = %e, "unusable peer identity");
            parts.headers.remove(identity_header);
        }
    }

    let response = pipeline
        .handle(http::Request::from_parts(parts, body))
        .await;
    let (parts, body) = response.into_parts();
    hyper::Response::from_parts(parts, Body::from(body))
}
