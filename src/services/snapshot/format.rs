//! Snapshot payload format.
//!
//! Version 1 is a JSON document:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "created_at": "2026-01-01T00:00:00Z",
//!   "stores": {
//!     "users": {
//!       "alice": { "kind": "scalar", "value": "admin" },
//!       "queue": { "kind": "list", "value": ["b", "a"] },
//!       "tags":  { "kind": "set", "value": ["x"], "expires_at": "2026-01-01T00:05:00Z" }
//!     }
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SNAPSHOT_FORMAT_VERSION;
use crate::error::{Error, Result};
use crate::services::kv::ExportedStores;

/// Complete point-in-time serialization of every store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    pub format_version: u64,
    pub created_at: DateTime<Utc>,
    pub stores: ExportedStores,
}

impl SnapshotState {
    /// Wraps exported stores in the current format.
    pub fn capture(stores: ExportedStores) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            stores,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a payload, checking the format version before anything else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompatibleSnapshot`] for a missing or unknown
    /// version and [`Error::Serialization`] for malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)?;
        let found = raw
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if found != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::IncompatibleSnapshot {
                found,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(serde_json::from_value(raw)?)
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn entry_count(&self) -> usize {
        self.stores.values().map(|entries| entries.len()).sum()
    }

    /// Drops entries that expired before `now`. Returns how many were dropped.
    pub fn drop_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut dropped = 0;
        for entries in self.stores.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired_at(now));
            dropped += before - entries.len();
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::{Entry, EntryValue};
    use std::collections::{BTreeMap, BTreeSet, VecDeque};

    fn sample() -> SnapshotState {
        let mut users = BTreeMap::new();
        users.insert(
            "alice".to_string(),
            Entry::persistent(EntryValue::Scalar("admin".into())),
        );
        users.insert(
            "queue".to_string(),
            Entry::persistent(EntryValue::List(VecDeque::from(vec![
                "b".to_string(),
                "a".to_string(),
            ]))),
        );
        users.insert(
            "tags".to_string(),
            Entry::persistent(EntryValue::Set(BTreeSet::from(["x".to_string()]))),
        );
        let mut stores = ExportedStores::new();
        stores.insert("users".to_string(), users);
        SnapshotState::capture(stores)
    }

    #[test]
    fn test_encoding_is_self_describing() {
        let bytes = sample().encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["format_version"], 1);
        assert_eq!(json["stores"]["users"]["alice"]["kind"], "scalar");
        assert_eq!(json["stores"]["users"]["queue"]["value"][0], "b");
        assert_eq!(json["stores"]["users"]["tags"]["kind"], "set");
        assert!(json["stores"]["users"]["alice"].get("expires_at").is_none());
    }

    #[test]
    fn test_decode_roundtrip() {
        let state = sample();
        let decoded = SnapshotState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.store_count(), 1);
        assert_eq!(decoded.entry_count(), 3);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let payload =
            br#"{"format_version": 2, "created_at": "2026-01-01T00:00:00Z", "stores": {}}"#;
        assert!(matches!(
            SnapshotState::decode(payload),
            Err(Error::IncompatibleSnapshot {
                found: 2,
                supported: 1
            })
        ));

        let unversioned = br#"{"stores": {}}"#;
        assert!(matches!(
            SnapshotState::decode(unversioned),
            Err(Error::IncompatibleSnapshot { found: 0, .. })
        ));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            SnapshotState::decode(b"not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_drop_expired() {
        let mut state = sample();
        let past = Utc::now() - chrono::Duration::seconds(5);
        state.stores.get_mut("users").unwrap().insert(
            "gone".to_string(),
            Entry {
                value: EntryValue::Scalar("x".into()),
                expires_at: Some(past),
            },
        );

        assert_eq!(state.drop_expired_at(Utc::now()), 1);
        assert_eq!(state.entry_count(), 3);
    }
}
