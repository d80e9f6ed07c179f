//! Configuration management for Gateward.
//!
//! All tunables live in one typed, immutable structure built at process
//! start and shared by reference into every component. Nothing here is
//! mutated at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Main configuration for the Gateward service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Retry policy for upstream calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Idempotency tracking configuration
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Rate/cache policy per endpoint class, keyed by class name
    #[serde(default)]
    pub endpoint_classes: HashMap<String, EndpointClassConfig>,

    /// Route rules mapping inbound requests to endpoint classes
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Name of the trusted, edge-assigned client identity header. The
    /// server layer sets it from the connection itself; client-supplied
    /// forwarding headers are never consulted.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_header: default_identity_header(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_identity_header() -> String {
    "x-edge-client-id".to_string()
}

/// Upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL the gateway forwards admitted requests to
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

/// Retry policy for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per logical upstream call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Initial backoff delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff ceiling.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Idempotency tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a recorded decision is replayed for a duplicated request id.
    /// Short by design: it only needs to cover realistic client retry
    /// windows.
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl(),
        }
    }
}

fn default_idempotency_ttl() -> u64 {
    60
}

/// What the rate limiter does for a class when the counter store is
/// unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Fail open: admit the request. For read-mostly classes where a store
    /// outage must not turn into a read-path denial of service.
    Allow,
    /// Fail closed: deny with a short retry hint. For enforcement-sensitive
    /// classes where over-admission during an outage is the worse failure.
    Deny,
}

impl Default for StoreErrorPolicy {
    fn default() -> Self {
        StoreErrorPolicy::Deny
    }
}

/// Rate and cache policy for a single endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointClassConfig {
    /// Maximum admitted requests per caller within the window
    pub limit: u32,

    /// Sliding window length in seconds
    pub window_secs: u64,

    /// Response cache TTL in seconds; 0 disables caching for this class
    #[serde(default)]
    pub cache_ttl_secs: u64,

    /// Fail-open/fail-closed choice when the counter store errors
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,
}

/// A route rule mapping a request to an endpoint class.
///
/// Rules are evaluated in order; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Optional HTTP method restriction (any method when absent)
    #[serde(default)]
    pub method: Option<String>,

    /// Path prefix to match
    pub prefix: String,

    /// Endpoint class name this route belongs to
    pub class: String,
}

impl GatewayConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_yaml::from_str(&contents)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        for (name, class) in &self.endpoint_classes {
            if class.limit == 0 {
                return Err(GatewayError::Config(format!(
                    "endpoint class '{}' has a zero limit",
                    name
                )));
            }
            if class.window_secs == 0 {
                return Err(GatewayError::Config(format!(
                    "endpoint class '{}' has a zero window",
                    name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(GatewayError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        for route in &self.routes {
            if !self.endpoint_classes.contains_key(&route.class) {
                return Err(GatewayError::Config(format!(
                    "route '{}' references unknown endpoint class '{}'",
                    route.prefix, route.class
                )));
            }
        }

        Ok(())
    }

    /// Look up the policy for an endpoint class.
    pub fn endpoint_class(&self, name: &str) -> Option<&EndpointClassConfig> {
        self.endpoint_classes.get(name)
    }

    /// Resolve the endpoint class name for a request, if any route matches.
    pub fn route_class(&self, method: &str, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| {
                let method_ok = match &r.method {
                    Some(m) => m.eq_ignore_ascii_case(method),
                    None => true,
                };
                method_ok && path.starts_with(&r.prefix)
            })
            .map(|r| r.class.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> GatewayConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.idempotency.ttl_secs, 60);
        assert_eq!(config.server.identity_header, "x-edge-client-id");
        assert!(config.endpoint_classes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
server:
  listen_addr: "0.0.0.0:8088"
upstream:
  base_url: "http://origin.internal:9000"
endpoint_classes:
  submit:
    limit: 10
    window_secs: 3600
    on_store_error: deny
  read:
    limit: 120
    window_secs: 60
    cache_ttl_secs: 300
    on_store_error: allow
routes:
  - method: POST
    prefix: /api/submit
    class: submit
  - prefix: /api/
    class: read
"#,
        );
        config.validate().unwrap();

        let submit = config.endpoint_class("submit").unwrap();
        assert_eq!(submit.limit, 10);
        assert_eq!(submit.window_secs, 3600);
        assert_eq!(submit.on_store_error, StoreErrorPolicy::Deny);

        let read = config.endpoint_class("read").unwrap();
        assert_eq!(read.cache_ttl_secs, 300);
        assert_eq!(read.on_store_error, StoreErrorPolicy::Allow);
    }

    #[test]
    fn test_route_resolution() {
        let config = parse(
            r#"
endpoint_classes:
  submit:
    limit: 10
    window_secs: 3600
  read:
    limit: 100
    window_secs: 60
routes:
  - method: POST
    prefix: /api/submit
    class: submit
  - prefix: /api/
    class: read
"#,
        );

        assert_eq!(config.route_class("POST", "/api/submit"), Some("submit"));
        // Method mismatch falls through to the prefix rule
        assert_eq!(config.route_class("GET", "/api/submit"), Some("read"));
        assert_eq!(config.route_class("GET", "/api/releases"), Some("read"));
        assert_eq!(config.route_class("GET", "/health"), None);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = parse(
            r#"
endpoint_classes:
  broken:
    limit: 0
    window_secs: 60
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_route_class() {
        let config = parse(
            r#"
routes:
  - prefix: /api/
    class: missing
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = GatewayConfig::default();
        config.retry.base_delay_ms = 60_000;
        config.retry.max_delay_ms = 30_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_error_policy_default_is_deny() {
        let config = parse(
            r#"
endpoint_classes:
  submit:
    limit: 10
    window_secs: 3600
"#,
        );
        assert_eq!(
            config.endpoint_class("submit").unwrap().on_store_error,
            StoreErrorPolicy::Deny
        );
    }
}
