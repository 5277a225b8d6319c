//! Backend trait for object storage.

use super::types::ObjectMeta;
use anyhow::Result;
use async_trait::async_trait;

/// Object storage bucket.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// `put` must be all-or-nothing: a concurrent or later `get` returns either
/// the previous object or the complete new one.
///
/// # Example
///
/// ```ignore
/// use rdict::services::objects::{MemoryObjectStore, ObjectStore};
///
/// let bucket = MemoryObjectStore::new();
/// bucket.put("rdict/snapshot.json", &payload).await?;
/// let (data, meta) = bucket.get("rdict/snapshot.json").await?.unwrap();
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Human-readable location of the bucket, for logs.
    fn location(&self) -> String;

    /// Stores an object, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the object is too large or
    /// the write fails. A failed write leaves the previous object intact.
    async fn put(&self, key: &str, data: &[u8]) -> Result<ObjectMeta>;

    /// Retrieves an object and its metadata. `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the read fails.
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>>;
}
