//! Object key validation.
//!
//! Keys are relative, slash-separated paths. Anything that could escape the
//! bucket directory is rejected.

use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};

/// Validates an object key and returns its normalized form.
///
/// `.` components are dropped and separators are normalized to `/`.
/// Empty keys, absolute keys and keys containing `..`, a root or a drive
/// prefix are rejected.
///
/// ```ignore
/// assert_eq!(normalize_key("./rdict/snapshot.json")?, "rdict/snapshot.json");
/// assert!(normalize_key("../etc/passwd").is_err());
/// ```
pub fn normalize_key(key: &str) -> Result<String> {
    let parts = key_components(key)?;
    Ok(parts.join("/"))
}

/// Filesystem location of an object inside a bucket directory.
pub(crate) fn object_path(bucket: &Path, key: &str) -> Result<PathBuf> {
    let mut path = bucket.to_path_buf();
    for part in key_components(key)? {
        path.push(part);
    }
    Ok(path)
}

fn key_components(key: &str) -> Result<Vec<String>> {
    if key.trim().is_empty() {
        bail!("Object key cannot be empty");
    }
    let path = Path::new(key);
    if path.is_absolute() || key.starts_with('/') || key.starts_with('\\') {
        bail!("Object key must be relative: {key}");
    }

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => {
                let Some(name) = name.to_str() else {
                    bail!("Object key is not valid UTF-8: {key}");
                };
                parts.push(name.to_string());
            },
            Component::CurDir => {},
            Component::ParentDir => bail!("Object key cannot contain '..': {key}"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("Object key cannot contain a root or drive prefix: {key}")
            },
        }
    }

    if parts.is_empty() {
        bail!("Object key normalized to nothing: {key}");
    }
    Ok(parts)
}
