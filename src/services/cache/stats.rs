use serde::Serialize;

/// Counters describing cache behavior since creation (or the last `clear`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// Records dropped to make room (LRU).
    pub evictions: u64,
    /// Records dropped because their TTL passed.
    pub expirations: u64,
    /// Records currently held, expired or not.
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that were hits, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
