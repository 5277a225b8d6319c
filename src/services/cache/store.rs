use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::trace;

use super::record::CacheRecord;
use super::stats::CacheStats;
use crate::services::search::Fingerprint;

/// TTL + LRU cache keyed by search fingerprint.
///
/// All state sits behind one mutex, so `lookup`, `insert` and eviction are
/// atomic with respect to each other and the size never exceeds `capacity`.
///
/// - `capacity == 0` disables caching: inserts are dropped and every lookup
///   is a miss.
/// - A TTL of zero makes records expire immediately: they are never retained.
pub struct SearchCache<V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    records: HashMap<Fingerprint, CacheRecord<V>>,
    /// tick → fingerprint; the first entry is the least recently used.
    recency: BTreeMap<u64, Fingerprint>,
    next_tick: u64,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn touch(&mut self, fingerprint: &Fingerprint) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(record) = self.records.get_mut(fingerprint) {
            self.recency.remove(&record.tick);
            record.tick = tick;
            self.recency.insert(tick, fingerprint.clone());
        }
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheRecord<V>> {
        let record = self.records.remove(fingerprint)?;
        self.recency.remove(&record.tick);
        Some(record)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Fingerprint> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();
        for fingerprint in &expired {
            self.remove(fingerprint);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_lru(&mut self) -> Option<Fingerprint> {
        let (_, fingerprint) = self.recency.pop_first()?;
        self.records.remove(&fingerprint);
        self.stats.evictions += 1;
        Some(fingerprint)
    }
}

impl<V: Clone> SearchCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                records: HashMap::with_capacity(capacity.min(1024)),
                recency: BTreeMap::new(),
                next_tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Default lifetime of inserted records.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Returns a live record's value and marks it most recently used.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<V> {
        self.lookup_at(fingerprint, Instant::now())
    }

    pub(crate) fn lookup_at(&self, fingerprint: &Fingerprint, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.records.get(fingerprint) {
            None => {
                inner.stats.misses += 1;
                metrics::counter!("rdict_cache_misses_total").increment(1);
                return None;
            },
            Some(record) => record.is_expired_at(now),
        };
        if expired {
            inner.remove(fingerprint);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            metrics::counter!("rdict_cache_misses_total").increment(1);
            return None;
        }

        inner.touch(fingerprint);
        inner.stats.hits += 1;
        metrics::counter!("rdict_cache_hits_total").increment(1);
        let record = inner.records.get_mut(fingerprint)?;
        record.last_access = now;
        Some(record.value.clone())
    }

    /// Inserts with the default TTL.
    pub fn insert(&self, fingerprint: Fingerprint, value: V) {
        self.insert_at(fingerprint, value, self.ttl, Instant::now());
    }

    /// Inserts with an explicit TTL.
    pub fn insert_with_ttl(&self, fingerprint: Fingerprint, value: V, ttl: Duration) {
        self.insert_at(fingerprint, value, ttl, Instant::now());
    }

    pub(crate) fn insert_at(
        &self,
        fingerprint: Fingerprint,
        value: V,
        ttl: Duration,
        now: Instant,
    ) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if ttl.is_zero() {
            if inner.remove(&fingerprint).is_some() {
                inner.stats.expirations += 1;
            }
            return;
        }

        if let Some(old) = inner.remove(&fingerprint) {
            trace!(
                fingerprint = %fingerprint,
                age = ?now.saturating_duration_since(old.inserted_at),
                "Replacing cache record"
            );
        } else if inner.records.len() >= self.capacity {
            inner.purge_expired(now);
            while inner.records.len() >= self.capacity {
                let Some(evicted) = inner.evict_lru() else {
                    break;
                };
                metrics::counter!("rdict_cache_evictions_total").increment(1);
                trace!(fingerprint = %evicted, "Evicted least recently used cache record");
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, fingerprint.clone());
        inner
            .records
            .insert(fingerprint, CacheRecord::new(value, now, ttl, tick));
        inner.stats.insertions += 1;
    }

    /// Drops one record. Returns whether it was present.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().remove(fingerprint).is_some()
    }

    /// Drops every record and resets the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.recency.clear();
        inner.stats = CacheStats::default();
    }

    /// Physically removes expired records.
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired(Instant::now())
    }

    /// Records held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.records.len(),
            capacity: self.capacity,
            ..inner.stats
        }
    }
}
