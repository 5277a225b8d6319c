//! Store registry: name → independent [`StoreEngine`].
//!
//! Stores are created lazily on first reference and only destroyed by an
//! explicit [`StoreRegistry::remove`]. Each store carries its own lock, so
//! unrelated stores never serialize on each other.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::engine::StoreEngine;
use super::entry::Entry;
use super::random::{RandomSource, ThreadRandom};
use crate::constants::MAX_STORE_NAME_LEN;
use crate::error::{Error, Result};

/// Validates a store name.
///
/// Names are case-sensitive, non-empty, at most [`MAX_STORE_NAME_LEN`] bytes
/// and limited to ASCII letters, digits, `_`, `-` and `.`. The colon is
/// reserved as the separator of the remote key layout.
pub fn validate_store_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name("store", name, "must not be empty"));
    }
    if name.len() > MAX_STORE_NAME_LEN {
        return Err(Error::invalid_name("store", name, "too long"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(Error::invalid_name(
            "store",
            name,
            "only ASCII letters, digits, '_', '-' and '.' are allowed",
        ));
    }
    Ok(())
}

/// Owns every store of the local engine.
#[derive(Clone)]
pub struct StoreRegistry {
    stores: Arc<DashMap<String, Arc<StoreEngine>>>,
    rng: Arc<dyn RandomSource>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRegistry {
    /// Creates an empty registry drawing `spop` members from the thread RNG.
    pub fn new() -> Self {
        Self::with_random(Arc::new(ThreadRandom))
    }

    /// Creates an empty registry with an injected random source.
    pub fn with_random(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            stores: Arc::new(DashMap::new()),
            rng,
        }
    }

    /// Returns the store with the given name, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<StoreEngine>> {
        if let Some(store) = self.stores.get(name) {
            return Ok(Arc::clone(store.value()));
        }
        validate_store_name(name)?;
        let store = self
            .stores
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(store = %name, "Creating store");
                Arc::new(StoreEngine::new(name, Arc::clone(&self.rng)))
            });
        Ok(Arc::clone(store.value()))
    }

    /// Returns an existing store without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<StoreEngine>> {
        self.stores.get(name).map(|store| Arc::clone(store.value()))
    }

    /// Store names, sorted.
    pub fn list_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Removes a store and all of its entries.
    pub fn remove(&self, name: &str) -> Result<bool> {
        validate_store_name(name)?;
        Ok(self.stores.remove(name).is_some())
    }

    /// Point-in-time copy of every store.
    ///
    /// Each store is copied under its own read lock, one at a time; no two
    /// store locks are ever held together.
    pub fn export(&self) -> BTreeMap<String, BTreeMap<String, Entry>> {
        let handles: Vec<Arc<StoreEngine>> = self
            .stores
            .iter()
            .map(|store| Arc::clone(store.value()))
            .collect();
        handles
            .into_iter()
            .map(|store| (store.name().to_string(), store.snapshot()))
            .collect()
    }

    /// Replaces the registry contents with restored stores.
    ///
    /// Stores missing from `restored` are dropped.
    pub fn replace_all(&self, restored: BTreeMap<String, BTreeMap<String, Entry>>) -> Result<()> {
        for name in restored.keys() {
            validate_store_name(name)?;
        }
        self.stores
            .retain(|name, _| restored.contains_key(name.as_str()));
        for (name, entries) in restored {
            self.get_or_create(&name)?.replace_all(entries);
        }
        Ok(())
    }

    /// Drops every store.
    pub fn clear(&self) {
        self.stores.clear();
    }

    /// Removes expired entries from all stores.
    pub fn purge_expired(&self) -> usize {
        let handles: Vec<Arc<StoreEngine>> = self
            .stores
            .iter()
            .map(|store| Arc::clone(store.value()))
            .collect();
        handles.iter().map(|store| store.purge_expired()).sum()
    }

    /// Purges expired entries every `interval` on a background task.
    ///
    /// Reads already treat expired entries as absent; the sweep reclaims the
    /// memory of keys nobody touches again.
    pub fn spawn_expiry_sweep(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = registry.purge_expired();
                if purged > 0 {
                    debug!(purged, "Expired entries purged");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
