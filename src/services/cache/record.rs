use std::time::{Duration, Instant};

/// A cached search result.
#[derive(Debug, Clone)]
pub struct CacheRecord<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub last_access: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent.
    pub expires_at: Option<Instant>,
    /// Recency stamp; higher is more recent.
    pub(super) tick: u64,
}

impl<V> CacheRecord<V> {
    pub(super) fn new(value: V, now: Instant, ttl: Duration, tick: u64) -> Self {
        Self {
            value,
            inserted_at: now,
            last_access: now,
            expires_at: now.checked_add(ttl),
            tick,
        }
    }

    /// A record is logically absent once its expiry has passed.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}
