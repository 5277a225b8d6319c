//! In-process storage backend.
//!
//! Wraps the [`StoreRegistry`] behind the [`KvBackend`] contract. This is the
//! local fallback engine the selector routes to whenever the remote backend
//! is unreachable (or not configured at all).
//!
//! Writes create a store on first use; reads and removals leave unknown
//! stores alone.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{ExportedStores, KvBackend};
use super::entry::EntryValue;
use super::engine::StoreEngine;
use super::registry::{StoreRegistry, validate_store_name};
use crate::error::{Error, Result};

/// In-memory multi-store backend.
///
/// # Thread Safety
///
/// `MemoryBackend` is `Clone`; clones share the same registry. Each store
/// has its own lock, so operations on unrelated stores run in parallel.
///
/// # Example
///
/// ```ignore
/// use rdict::services::kv::{KvBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// backend.set("users", "alice", "admin".into(), None).await?;
/// assert_eq!(backend.get("users", "alice").await?, "admin");
/// ```
#[derive(Clone, Default)]
pub struct MemoryBackend {
    registry: StoreRegistry,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over an existing registry.
    pub fn with_registry(registry: StoreRegistry) -> Self {
        Self { registry }
    }

    /// The registry holding every local store.
    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// An existing store. Reads and removals never create one.
    fn existing(&self, store: &str) -> Result<Option<Arc<StoreEngine>>> {
        validate_store_name(store)?;
        Ok(self.registry.get(store))
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set(
        &self,
        store: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.registry.get_or_create(store)?.set(key, value, ttl)
    }

    async fn get(&self, store: &str, key: &str) -> Result<String> {
        match self.existing(store)? {
            Some(engine) => engine.get(key),
            None => Err(Error::not_found(store, key)),
        }
    }

    async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        match self.existing(store)? {
            Some(engine) => engine.delete(key),
            None => Ok(false),
        }
    }

    async fn update(&self, store: &str, key: &str, value: String) -> Result<String> {
        match self.existing(store)? {
            Some(engine) => engine.update(key, value),
            None => Err(Error::not_found(store, key)),
        }
    }

    async fn keys(&self, store: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        match self.existing(store)? {
            Some(engine) => Ok(engine.keys(prefix)),
            None => Err(Error::store_not_found(store)),
        }
    }

    async fn items(&self, store: &str) -> Result<Vec<(String, EntryValue)>> {
        match self.existing(store)? {
            Some(engine) => Ok(engine.items()),
            None => Err(Error::store_not_found(store)),
        }
    }

    async fn lpush(&self, store: &str, key: &str, value: String) -> Result<usize> {
        self.registry.get_or_create(store)?.lpush(key, value)
    }

    async fn lpop(&self, store: &str, key: &str) -> Result<String> {
        match self.existing(store)? {
            Some(engine) => engine.lpop(key),
            None => Err(Error::not_found(store, key)),
        }
    }

    async fn sadd(&self, store: &str, key: &str, value: String) -> Result<bool> {
        self.registry.get_or_create(store)?.sadd(key, value)
    }

    async fn spop(&self, store: &str, key: &str) -> Result<String> {
        match self.existing(store)? {
            Some(engine) => engine.spop(key),
            None => Err(Error::not_found(store, key)),
        }
    }

    async fn create_store(&self, store: &str) -> Result<()> {
        self.registry.get_or_create(store).map(|_| ())
    }

    async fn delete_store(&self, store: &str) -> Result<bool> {
        self.registry.remove(store)
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        Ok(self.registry.list_stores())
    }

    async fn export(&self) -> Result<ExportedStores> {
        Ok(self.registry.export())
    }
}
