//! Shared-store capability traits.
//!
//! The counter store and the cache store are the only shared mutable
//! resources in the system. Both are treated as append-mostly: the counter
//! store sees pure inserts with TTL expiry, the cache store whole-entry
//! insert-or-overwrite. Neither trait offers compare-and-swap, transactions,
//! or atomic increments; that constraint is load-bearing for the limiter's
//! per-slot record design.

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::error::Result;

mod memory;

pub use memory::{InMemoryCacheStore, InMemoryCounterStore};

/// A shared, keyed, TTL-capable key-value store for counter and
/// idempotency records.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the value stored under a key, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value under a key with a TTL in seconds.
    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;
}

/// A shared store for cached upstream responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a cached entry. Freshness is the caller's concern.
    async fn match_entry(&self, key: &str) -> Option<CacheEntry>;

    /// Store an entry, overwriting any previous one. Writes are whole-entry;
    /// entries are never partially updated.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;
}
