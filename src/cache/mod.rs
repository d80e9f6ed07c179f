//! Cache-aside response caching with a header-safety allowlist.

mod entry;
mod response;

pub use entry::{CacheEntry, CACHEABLE_RESPONSE_HEADERS};
pub use response::{cache_key, CacheStatus, CachedResponse, ResponseCache};
