//! Backend trait for the store surface.
//!
//! Both the local engine and the remote data-structure server implement
//! [`KvBackend`]. Callers never talk to a backend directly: they build a
//! [`Command`] and hand it to the backend selector, which applies it to
//! whichever backend is current.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use super::engine::validate_key;
use super::entry::{Entry, EntryValue};
use super::registry::validate_store_name;
use crate::error::{Error, Result};

/// Every store's full contents, keyed by store name then key.
pub type ExportedStores = BTreeMap<String, BTreeMap<String, Entry>>;

/// Backend trait for multi-store key-value storage.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// Remote implementations report transport failures as
/// [`Error::Remote`]; every other error is a caller error that must be
/// returned as-is.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Name reported on the health surface (`"remote"` or `"memory"`).
    fn name(&self) -> &'static str;

    /// Lightweight liveness check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the backend cannot be reached.
    async fn ping(&self) -> Result<()>;

    /// Inserts or overwrites a scalar with an optional TTL.
    async fn set(&self, store: &str, key: &str, value: String, ttl: Option<Duration>)
    -> Result<()>;

    /// Retrieves a scalar. Absent or expired keys are `NotFound`.
    async fn get(&self, store: &str, key: &str) -> Result<String>;

    /// Deletes a key of any kind. Returns whether a key was removed.
    async fn delete(&self, store: &str, key: &str) -> Result<bool>;

    /// Overwrites an existing scalar. Absent keys are `NotFound`.
    async fn update(&self, store: &str, key: &str, value: String) -> Result<String>;

    /// Lists live keys, sorted, optionally filtered by prefix.
    async fn keys(&self, store: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Lists live `(key, value)` pairs, sorted by key.
    async fn items(&self, store: &str) -> Result<Vec<(String, EntryValue)>>;

    /// Prepends to a list. Returns the new length.
    async fn lpush(&self, store: &str, key: &str, value: String) -> Result<usize>;

    /// Removes and returns the list head.
    async fn lpop(&self, store: &str, key: &str) -> Result<String>;

    /// Adds a set member. Returns whether it was newly added.
    async fn sadd(&self, store: &str, key: &str, value: String) -> Result<bool>;

    /// Removes and returns a random set member.
    async fn spop(&self, store: &str, key: &str) -> Result<String>;

    /// Registers a store explicitly (stores are otherwise created on first use).
    async fn create_store(&self, store: &str) -> Result<()>;

    /// Removes a store and all of its entries.
    async fn delete_store(&self, store: &str) -> Result<bool>;

    /// Lists store names, sorted.
    async fn list_stores(&self) -> Result<Vec<String>>;

    /// Full copy of every store, used by the snapshot pipeline.
    async fn export(&self) -> Result<ExportedStores>;
}

/// A single operation against the store surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        store: String,
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Get {
        store: String,
        key: String,
    },
    Delete {
        store: String,
        key: String,
    },
    Update {
        store: String,
        key: String,
        value: String,
    },
    Keys {
        store: String,
        prefix: Option<String>,
    },
    Items {
        store: String,
    },
    LPush {
        store: String,
        key: String,
        value: String,
    },
    LPop {
        store: String,
        key: String,
    },
    SAdd {
        store: String,
        key: String,
        value: String,
    },
    SPop {
        store: String,
        key: String,
    },
    CreateStore {
        store: String,
    },
    DeleteStore {
        store: String,
    },
    ListStores,
}

/// Result of a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Value(String),
    Flag(bool),
    Length(usize),
    Keys(Vec<String>),
    Items(Vec<(String, EntryValue)>),
    Stores(Vec<String>),
}

impl Command {
    /// Operation name, used for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Get { .. } => "get",
            Self::Delete { .. } => "delete",
            Self::Update { .. } => "update",
            Self::Keys { .. } => "keys",
            Self::Items { .. } => "items",
            Self::LPush { .. } => "lpush",
            Self::LPop { .. } => "lpop",
            Self::SAdd { .. } => "sadd",
            Self::SPop { .. } => "spop",
            Self::CreateStore { .. } => "create_store",
            Self::DeleteStore { .. } => "delete_store",
            Self::ListStores => "list_stores",
        }
    }

    /// Whether `reply` shows that this command changed stored state.
    ///
    /// A delete of a missing key or store and an `sadd` of an existing
    /// member answer `false` and changed nothing.
    pub fn mutated(&self, reply: &Reply) -> bool {
        match (self, reply) {
            (
                Self::Delete { .. } | Self::DeleteStore { .. } | Self::SAdd { .. },
                Reply::Flag(changed),
            ) => *changed,
            _ => self.is_mutation(),
        }
    }

    /// Whether a successful run can change stored state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Set { .. }
                | Self::Delete { .. }
                | Self::Update { .. }
                | Self::LPush { .. }
                | Self::LPop { .. }
                | Self::SAdd { .. }
                | Self::SPop { .. }
                | Self::CreateStore { .. }
                | Self::DeleteStore { .. }
        )
    }

    /// Store the command targets, if any.
    pub fn store(&self) -> Option<&str> {
        match self {
            Self::Set { store, .. }
            | Self::Get { store, .. }
            | Self::Delete { store, .. }
            | Self::Update { store, .. }
            | Self::Keys { store, .. }
            | Self::Items { store }
            | Self::LPush { store, .. }
            | Self::LPop { store, .. }
            | Self::SAdd { store, .. }
            | Self::SPop { store, .. }
            | Self::CreateStore { store }
            | Self::DeleteStore { store } => Some(store.as_str()),
            Self::ListStores => None,
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            Self::Set { key, .. }
            | Self::Get { key, .. }
            | Self::Delete { key, .. }
            | Self::Update { key, .. }
            | Self::LPush { key, .. }
            | Self::LPop { key, .. }
            | Self::SAdd { key, .. }
            | Self::SPop { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }

    /// Checks store and key identifiers before any backend sees the command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for malformed identifiers.
    pub fn validate(&self) -> Result<()> {
        if let Some(store) = self.store() {
            validate_store_name(store)?;
        }
        if let Some(key) = self.key() {
            validate_key(key)?;
        }
        Ok(())
    }

    /// Runs the command against a backend.
    ///
    /// # Errors
    ///
    /// Propagates the backend's error unchanged.
    pub async fn apply(&self, backend: &dyn KvBackend) -> Result<Reply> {
        let reply = match self {
            Self::Set {
                store,
                key,
                value,
                ttl,
            } => {
                backend.set(store, key, value.clone(), *ttl).await?;
                Reply::Done
            },
            Self::Get { store, key } => Reply::Value(backend.get(store, key).await?),
            Self::Delete { store, key } => Reply::Flag(backend.delete(store, key).await?),
            Self::Update { store, key, value } => {
                Reply::Value(backend.update(store, key, value.clone()).await?)
            },
            Self::Keys { store, prefix } => {
                Reply::Keys(backend.keys(store, prefix.as_deref()).await?)
            },
            Self::Items { store } => Reply::Items(backend.items(store).await?),
            Self::LPush { store, key, value } => {
                Reply::Length(backend.lpush(store, key, value.clone()).await?)
            },
            Self::LPop { store, key } => Reply::Value(backend.lpop(store, key).await?),
            Self::SAdd { store, key, value } => {
                Reply::Flag(backend.sadd(store, key, value.clone()).await?)
            },
            Self::SPop { store, key } => Reply::Value(backend.spop(store, key).await?),
            Self::CreateStore { store } => {
                backend.create_store(store).await?;
                Reply::Done
            },
            Self::DeleteStore { store } => Reply::Flag(backend.delete_store(store).await?),
            Self::ListStores => Reply::Stores(backend.list_stores().await?),
        };
        Ok(reply)
    }
}

impl Reply {
    fn unexpected(self, expected: &str) -> Error {
        Error::Internal(format!("expected {expected} reply, got {self:?}"))
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            Self::Done => Ok(()),
            other => Err(other.unexpected("empty")),
        }
    }

    pub fn into_value(self) -> Result<String> {
        match self {
            Self::Value(value) => Ok(value),
            other => Err(other.unexpected("value")),
        }
    }

    pub fn into_flag(self) -> Result<bool> {
        match self {
            Self::Flag(flag) => Ok(flag),
            other => Err(other.unexpected("flag")),
        }
    }

    pub fn into_length(self) -> Result<usize> {
        match self {
            Self::Length(len) => Ok(len),
            other => Err(other.unexpected("length")),
        }
    }

    pub fn into_keys(self) -> Result<Vec<String>> {
        match self {
            Self::Keys(keys) | Self::Stores(keys) => Ok(keys),
            other => Err(other.unexpected("key list")),
        }
    }

    pub fn into_items(self) -> Result<Vec<(String, EntryValue)>> {
        match self {
            Self::Items(items) => Ok(items),
            other => Err(other.unexpected("item list")),
        }
    }
}
