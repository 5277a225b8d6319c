//! In-memory object store.

use super::backend::ObjectStore;
use super::types::ObjectMeta;
use super::validation::normalize_key;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone)]
struct MemoryObject {
    data: Arc<[u8]>,
    meta: ObjectMeta,
}

/// Non-persistent object store using `DashMap`.
///
/// Clones share the same objects. A `put` replaces the map slot in one step,
/// so readers never see a partial object.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<ObjectMeta> {
        let key = normalize_key(key)?;
        let meta = ObjectMeta {
            key: key.clone(),
            size: data.len() as u64,
            modified_at: Utc::now(),
        };
        self.objects.insert(
            key,
            MemoryObject {
                data: Arc::from(data),
                meta: meta.clone(),
            },
        );
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>> {
        let key = normalize_key(key)?;
        Ok(self
            .objects
            .get(&key)
            .map(|obj| (obj.data.to_vec(), obj.meta.clone())))
    }
}
