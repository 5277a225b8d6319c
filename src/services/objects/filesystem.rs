//! Filesystem-backed object store.

use super::backend::ObjectStore;
use super::types::ObjectMeta;
use super::validation::{normalize_key, object_path};
use crate::constants::MAX_OBJECT_SIZE;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Object store rooted at a local directory.
///
/// # Thread Safety
///
/// `FilesystemObjectStore` is `Clone`; blocking I/O runs on tokio's blocking
/// pool. Concurrent `put`s on one key are last-rename-wins and never mix
/// bytes.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    bucket: PathBuf,
}

impl FilesystemObjectStore {
    /// Opens the bucket directory, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(bucket: P) -> Result<Self> {
        let bucket = bucket.as_ref().to_path_buf();
        fs::create_dir_all(&bucket)
            .with_context(|| format!("Failed to create bucket directory: {}", bucket.display()))?;
        Ok(Self { bucket })
    }

    pub fn bucket(&self) -> &Path {
        &self.bucket
    }

    fn put_sync(&self, key: &str, data: &[u8]) -> Result<ObjectMeta> {
        if data.len() as u64 > MAX_OBJECT_SIZE {
            bail!(
                "Object '{key}' is {} bytes, limit is {MAX_OBJECT_SIZE}",
                data.len()
            );
        }
        let normalized = normalize_key(key)?;
        let target = object_path(&self.bucket, key)?;
        let parent = target
            .parent()
            .with_context(|| format!("Object path has no parent: {}", target.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directories for: {key}"))?;

        // Same directory as the target so the final rename cannot cross filesystems.
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary file for: {key}"))?;
        tmp.write_all(data)
            .with_context(|| format!("Failed to write object: {key}"))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync object: {key}"))?;
        tmp.persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to commit object: {key}"))?;
        sync_dir(parent);

        meta_for(&normalized, &target)
    }

    fn get_sync(&self, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>> {
        let normalized = normalize_key(key)?;
        let path = object_path(&self.bucket, key)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read object: {key}")),
        };
        let meta = meta_for(&normalized, &path)?;
        Ok(Some((data, meta)))
    }
}

fn meta_for(key: &str, path: &Path) -> Result<ObjectMeta> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to get object metadata: {key}"))?;
    let modified_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(ObjectMeta {
        key: key.to_string(),
        size: metadata.len(),
        modified_at,
    })
}

/// Persists the rename itself. Best effort.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    let synced = fs::File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(e) = synced {
        tracing::debug!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn location(&self) -> String {
        self.bucket.display().to_string()
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<ObjectMeta> {
        let store = self.clone();
        let key = key.to_string();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || store.put_sync(&key, &data))
            .await
            .context("Task join error")?
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get_sync(&key))
            .await
            .context("Task join error")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemObjectStore::open(tmp.path()).unwrap();

        let meta = store.put("rdict/snapshot.json", b"{}").await.unwrap();
        assert_eq!(meta.key, "rdict/snapshot.json");
        assert_eq!(meta.size, 2);

        let (data, meta) = store.get("rdict/snapshot.json").await.unwrap().unwrap();
        assert_eq!(data, b"{}");
        assert_eq!(meta.size, 2);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemObjectStore::open(tmp.path()).unwrap();
        assert!(store.get("missing.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemObjectStore::open(tmp.path()).unwrap();

        store.put("snap.json", b"first version").await.unwrap();
        store.put("snap.json", b"second").await.unwrap();

        let (data, _) = store.get("snap.json").await.unwrap().unwrap();
        assert_eq!(data, b"second");

        // No temporary files are left next to the object.
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["snap.json"]);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemObjectStore::open(tmp.path().join("bucket")).unwrap();
        assert!(store.put("../escape.json", b"x").await.is_err());
        assert!(!tmp.path().join("escape.json").exists());
    }
}
