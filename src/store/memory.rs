//! In-process store implementations.
//!
//! These back the demo binary and the test suite. TTL expiry is driven by
//! the injected [`Clock`], so tests with a manual clock see the same expiry
//! behavior the limiter's window math assumes.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::error::Result;

use super::{CacheStore, CounterStore};

struct TtlValue {
    value: Vec<u8>,
    expires_at: u64,
}

/// An in-memory counter store with per-key TTL.
pub struct InMemoryCounterStore {
    entries: DashMap<String, TtlValue>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    /// Create an empty store driven by the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live (unexpired) keys. Primarily useful for tests.
    pub fn len(&self) -> usize {
        let now = self.clock.epoch_secs();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.epoch_secs();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired keys are evicted lazily on read
        self.entries.remove_if(key, |_, v| v.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let expires_at = self.clock.epoch_secs() + ttl_secs;
        self.entries
            .insert(key.to_string(), TtlValue { value, expires_at });
        Ok(())
    }
}

/// An in-memory response cache store.
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheStore {
    /// Create an empty cache store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries, fresh or not. Primarily useful for tests.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn match_entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }
}
