//! Duplicate-request suppression for rate limit decisions.
//!
//! Not a general-purpose dedup cache: this exists solely so a retried or
//! duplicated request observes the same [`RateDecision`] as its first
//! submission instead of being charged against quota twice. All failure
//! modes degrade to recomputing, which at worst double-charges one request.

use std::future::Future;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::store::CounterStore;

use super::decision::RateDecision;

/// A stored decision for a previously seen request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The request id the decision was made for
    pub request_id: String,
    /// The decision to replay
    pub decision: RateDecision,
    /// Epoch seconds after which the record is stale
    pub expires_at: u64,
}

/// Associates request ids with rate limit decisions for a short TTL.
pub struct IdempotencyTracker {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
}

impl IdempotencyTracker {
    /// Create a tracker over the given counter store.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            ttl_secs,
        }
    }

    fn store_key(request_id: &str) -> String {
        format!("idem:{}", request_id)
    }

    /// Return the stored decision for a request id, or compute, store, and
    /// return a fresh one.
    ///
    /// Store failures are logged and fall through to recomputation; this is
    /// a best-effort aid, not a required pipeline step.
    pub async fn record_or_reuse<F, Fut>(&self, request_id: &str, compute: F) -> RateDecision
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RateDecision>,
    {
        let key = Self::store_key(request_id);
        let now = self.clock.epoch_secs();

        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<IdempotencyRecord>(&bytes) {
                Ok(record) if record.expires_at > now => {
                    trace!(request_id, "replaying stored rate decision");
                    return record.decision;
                }
                Ok(_) => {
                    // Stale record the store has not evicted yet
                }
                Err(e) => {
                    warn!(request_id, error = %e, "undecodable idempotency record, recomputing");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(request_id, error = %e, "idempotency lookup failed, recomputing");
            }
        }

        let decision = compute().await;

        let record = IdempotencyRecord {
            request_id: request_id.to_string(),
            decision: decision.clone(),
            expires_at: now + self.ttl_secs,
        };
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(&key, bytes, self.ttl_secs).await {
                    warn!(request_id, error = %e, "failed to persist idempotency record");
                }
            }
            Err(e) => {
                warn!(request_id, error = %e, "failed to encode idempotency record");
            }
        }

        decision
    }
}
