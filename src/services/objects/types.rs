use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Normalized object key (e.g. `rdict/snapshot.json`).
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// When the current version was committed.
    pub modified_at: DateTime<Utc>,
}
