//! Counter key generation.

/// The store key for one second-slot of one caller's usage of one endpoint
/// class.
///
/// Each admitted request writes a record under its current slot's key.
/// Concurrent requests in different slots (or from different callers) write
/// distinct keys, which is what keeps the write path race-free without
/// atomic increments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Endpoint class the usage counts against
    pub class: String,
    /// Trusted caller identity
    pub caller: String,
    /// Second-granularity time slot
    pub slot: u64,
}

impl WindowKey {
    /// Create a key for a (class, caller, slot) triple.
    pub fn new(class: &str, caller: &str, slot: u64) -> Self {
        Self {
            class: class.to_string(),
            caller: caller.to_string(),
            slot,
        }
    }

    /// Serialize to the store's key namespace.
    pub fn to_store_key(&self) -> String {
        format!("rl:{}:{}:{}", self.class, self.caller, self.slot)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
