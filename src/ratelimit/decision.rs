//! Rate limit decision and counter record types.

use serde::{Deserialize, Serialize};

/// The outcome of one rate limit evaluation.
///
/// Produced fresh per evaluation, except when an idempotency record replays
/// an earlier decision for a duplicated request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The class limit the decision was made against (0 when unenforced)
    pub limit: u32,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// When the window has room again, epoch milliseconds
    pub reset_at_ms: i64,
    /// On denial, seconds the caller should wait before retrying
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    /// Decision for an endpoint class with no configured limit: always
    /// admit, with quota headers reporting an unenforced limit.
    pub fn unenforced(now_ms: i64) -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_at_ms: now_ms,
            retry_after_secs: None,
        }
    }

    /// The window reset time in whole epoch seconds, as exposed in the
    /// `X-RateLimit-Reset` header.
    pub fn reset_at_secs(&self) -> i64 {
        self.reset_at_ms / 1000
    }
}

/// One admitted request's mark in the counter store.
///
/// Created on admission, expired by store TTL, never mutated. The usage for
/// a window is the number of these records whose slot falls within the
/// trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Second-granularity slot the request landed in
    pub slot: u64,
    /// Epoch seconds at creation
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_reset_secs() {
        let decision = RateDecision {
            allowed: true,
            limit: 10,
            remaining: 9,
            reset_at_ms: 1_700_003_600_000,
            retry_after_secs: None,
        };
        assert_eq!(decision.reset_at_secs(), 1_700_003_600);
    }

    #[test]
    fn test_counter_record_serde_round_trip() {
        let record = CounterRecord {
            slot: 1_700_000_000,
            created_at: 1_700_000_000,
        };
        let bytes = serde_json::to_vec(&record).unwrap();
        let back: CounterRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
    }
}
