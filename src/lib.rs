//! Gateward - Admission Control for an Edge API Gateway
//!
//! This crate implements the admission-control layer of an edge API
//! gateway: for every inbound request it decides whether to serve a cached
//! answer, forward the request to a rate-limited and retried upstream call,
//! or reject the caller, before any business logic runs. Cross-instance
//! state lives in external TTL-capable key-value stores; the design
//! tolerates fully concurrent, unordered writes without locks or atomic
//! increments.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
pub mod store;
pub mod upstream;
