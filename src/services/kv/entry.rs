//! Entry types stored in a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

/// Kind of value an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Scalar,
    List,
    Set,
}

impl EntryKind {
    /// Name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::List => "list",
            Self::Set => "set",
        }
    }
}

/// Tagged value of an entry.
///
/// Serialized as `{"kind": "...", "value": ...}` so snapshots and API
/// responses are self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum EntryValue {
    Scalar(String),
    /// Head of the list is the front of the deque.
    List(VecDeque<String>),
    /// Ordered for deterministic iteration (seeded `spop`, stable output).
    Set(BTreeSet<String>),
}

impl EntryValue {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Scalar(_) => EntryKind::Scalar,
            Self::List(_) => EntryKind::List,
            Self::Set(_) => EntryKind::Set,
        }
    }

    /// True when a list or set has no members left.
    pub(crate) fn is_empty_collection(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::List(items) => items.is_empty(),
            Self::Set(members) => members.is_empty(),
        }
    }
}

/// A stored value with an optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: EntryValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Creates an entry that expires `ttl` from now, or never.
    pub fn new(value: EntryValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(expiry_from_now),
        }
    }

    /// Creates an entry without expiry.
    pub fn persistent(value: EntryValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.value.kind()
    }

    /// Checks if this entry has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Checks if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Out-of-range TTLs yield no expiry.
fn expiry_from_now(ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
}
