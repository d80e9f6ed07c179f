//! Error types for the Gateward admission-control core.

use thiserror::Error;

/// Main error type for Gateward operations.
///
/// The variants form the caller-visible failure taxonomy: a caller must be
/// able to tell "you are over quota" apart from "the service is having
/// trouble", and operators must be able to tell a deliberate denial from a
/// broken dependency.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The caller exceeded its quota. A normal, expected outcome carrying
    /// actionable retry timing; never logged as an error.
    #[error("quota exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        /// Seconds until the caller's window has room again
        retry_after_secs: u64,
    },

    /// The upstream call failed (transport error or a terminal bad status).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The counter or cache store could not be reached. Resolved per
    /// endpoint class by the configured fail-open/fail-closed policy.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed input, rejected before any store or upstream interaction.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// HTTP status class for the rejection (400, 415, ...)
        status: u16,
        /// Human-readable reason, safe to echo to the caller
        reason: String,
    },

    /// The retry budget was consumed without a usable response.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Description of the last observed failure
        last: String,
    },

    /// Configuration-related errors (startup only).
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gateward operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
