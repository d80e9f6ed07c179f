//! Bounded retry with exponential backoff for upstream calls.

use std::future::Future;
use std::time::Duration;
use http::StatusCode;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{GatewayError, Result};

use super::UpstreamResponse;

/// Transient per-call retry bookkeeping. Discarded after success or
/// attempt exhaustion, never persisted.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
}

/// Wraps a single upstream operation with bounded retry and exponential
/// backoff, honoring server backpressure signals.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryingClient {
    /// Create a client from the configured retry policy.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Invoke `operation` until it yields a non-transient response, retrying
    /// 429 (with a `Retry-After` hint when supplied), 5xx, and transport
    /// errors with doubling, capped delays.
    ///
    /// Any other response, including non-429 4xx, is returned immediately.
    /// After the attempt budget is spent the last observed failure is
    /// raised as [`GatewayError::Exhausted`].
    pub async fn call_with_retry<F, Fut>(&self, mut operation: F) -> Result<UpstreamResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<UpstreamResponse>>,
    {
        let mut state = RetryState {
            attempt: 0,
            next_delay: self.base_delay,
        };

        loop {
            state.attempt += 1;

            let (delay, last_error) = match operation().await {
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                    let delay = retry_after_hint(&response.headers)
                        .unwrap_or(state.next_delay)
                        .min(self.max_delay);
                    (
                        delay,
                        GatewayError::UpstreamUnavailable(
                            "upstream backpressure (status 429)".to_string(),
                        ),
                    )
                }
                Ok(response) if response.status.is_server_error() => (
                    state.next_delay,
                    GatewayError::UpstreamUnavailable(format!(
                        "upstream returned status {}",
                        response.status.as_u16()
                    )),
                ),
                Ok(response) => return Ok(response),
                Err(e) => (state.next_delay, e),
            };

            if state.attempt >= self.max_attempts {
                return Err(GatewayError::Exhausted {
                    attempts: state.attempt,
                    last: last_error.to_string(),
                });
            }

            debug!(
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "retrying upstream call"
            );

            // Suspends this request only; concurrent requests keep moving.
            tokio::time::sleep(delay).await;
            state.next_delay = (state.next_delay * 2).min(self.max_delay);
        }
    }
}

/// Parse a numeric `Retry-After` header into a delay. HTTP-date forms are
/// ignored and fall back to backoff.
fn retry_after_hint(headers: &http::HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
