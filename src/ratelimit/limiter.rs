//! Core sliding-window rate limiter.
//!
//! Usage for a caller is the number of per-second slot records present in
//! the trailing window. The store offers no atomic increment, so a single
//! mutable counter would race under concurrent admission; one
//! independently-created, independently-expiring record per slot makes the
//! write path race-free at the cost of a window-length fan-out of point
//! reads per decision.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::{EndpointClassConfig, GatewayConfig, StoreErrorPolicy};
use crate::store::CounterStore;

use super::decision::{CounterRecord, RateDecision};
use super::idempotency::IdempotencyTracker;
use super::key::WindowKey;

/// Extra record TTL beyond the window, to absorb clock skew across edge
/// instances.
const TTL_SKEW_BUFFER_SECS: u64 = 10;

/// Retry hint attached to fail-closed denials during a store outage.
const STORE_ERROR_RETRY_SECS: u64 = 60;

/// Sliding-window rate limiter over a shared counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: Arc<GatewayConfig>,
    clock: Arc<dyn Clock>,
    idempotency: IdempotencyTracker,
}

impl RateLimiter {
    /// Create a limiter over the given store and configuration.
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: Arc<GatewayConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let idempotency = IdempotencyTracker::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.idempotency.ttl_secs,
        );
        Self {
            store,
            config,
            clock,
            idempotency,
        }
    }

    /// Evaluate a caller's request against an endpoint class.
    ///
    /// When a request id is supplied, a duplicated submission within the
    /// idempotency TTL replays the first decision unchanged instead of
    /// re-charging the caller's quota.
    pub async fn evaluate(
        &self,
        caller: &str,
        class: &str,
        request_id: Option<&str>,
    ) -> RateDecision {
        match request_id {
            Some(id) => {
                self.idempotency
                    .record_or_reuse(id, || self.evaluate_fresh(caller, class))
                    .await
            }
            None => self.evaluate_fresh(caller, class).await,
        }
    }

    async fn evaluate_fresh(&self, caller: &str, class: &str) -> RateDecision {
        let Some(cfg) = self.config.endpoint_class(class) else {
            warn!(class, "no rate limit configured for endpoint class, admitting");
            return RateDecision::unenforced(self.clock.epoch_ms());
        };

        let now = self.clock.epoch_secs();
        let window = cfg.window_secs;
        let current_slot = now;

        trace!(
            caller,
            class,
            slot = current_slot,
            window,
            "evaluating rate limit"
        );

        // Count slot records across the trailing window. One point read per
        // second-slot; the fan-out is bounded by the window length.
        let mut usage: u32 = 0;
        let mut oldest_slot: Option<u64> = None;
        for slot in current_slot.saturating_sub(window - 1)..=current_slot {
            let key = WindowKey::new(class, caller, slot);
            match self.store.get(&key.to_store_key()).await {
                Ok(Some(_)) => {
                    usage += 1;
                    if oldest_slot.is_none() {
                        oldest_slot = Some(slot);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        caller,
                        class,
                        error = %e,
                        policy = ?cfg.on_store_error,
                        "counter store unavailable during window read"
                    );
                    return self.store_error_decision(cfg, now);
                }
            }
        }

        // The window has room again once the oldest counted slot falls out
        // of the trailing window.
        let reset_secs = oldest_slot.unwrap_or(current_slot) + window;

        if usage >= cfg.limit {
            debug!(caller, class, usage, limit = cfg.limit, "rate limit exceeded");
            return RateDecision {
                allowed: false,
                limit: cfg.limit,
                remaining: 0,
                reset_at_ms: reset_secs as i64 * 1000,
                retry_after_secs: Some(reset_secs.saturating_sub(now).max(1)),
            };
        }

        let record = CounterRecord {
            slot: current_slot,
            created_at: now,
        };
        let key = WindowKey::new(class, caller, current_slot);
        let encoded = serde_json::to_vec(&record).unwrap_or_default();
        if let Err(e) = self
            .store
            .put(&key.to_store_key(), encoded, window + TTL_SKEW_BUFFER_SECS)
            .await
        {
            warn!(
                caller,
                class,
                error = %e,
                policy = ?cfg.on_store_error,
                "counter store unavailable during record write"
            );
            return self.store_error_decision(cfg, now);
        }

        RateDecision {
            allowed: true,
            limit: cfg.limit,
            remaining: cfg.limit - usage - 1,
            reset_at_ms: reset_secs as i64 * 1000,
            retry_after_secs: None,
        }
    }

    /// Resolve a store outage per the class's configured policy. The chosen
    /// outcome is visible in the caller's logs via the warnings above.
    fn store_error_decision(&self, cfg: &EndpointClassConfig, now: u64) -> RateDecision {
        match cfg.on_store_error {
            StoreErrorPolicy::Allow => RateDecision {
                allowed: true,
                limit: cfg.limit,
                remaining: cfg.limit.saturating_sub(1),
                reset_at_ms: (now + cfg.window_secs) as i64 * 1000,
                retry_after_secs: None,
            },
            StoreErrorPolicy::Deny => RateDecision {
                allowed: false,
                limit: cfg.limit,
                remaining: 0,
                reset_at_ms: (now + STORE_ERROR_RETRY_SECS) as i64 * 1000,
                retry_after_secs: Some(STORE_ERROR_RETRY_SECS),
            },
        }
    }
}
