//! Entry engine: one store's key space with scalar, list and set semantics.
//!
//! Every operation takes the store's lock exactly once, so each call is
//! atomic to observers and conflicting writes to the same key never
//! interleave. Expired entries are treated as absent and purged lazily by the
//! next write that touches them (or by [`StoreEngine::purge_expired`]).

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::entry::{Entry, EntryKind, EntryValue};
use super::random::RandomSource;
use crate::constants::MAX_KEY_LEN;
use crate::error::{Error, Result};

/// Validates a key identifier.
///
/// Keys must be non-empty, at most [`MAX_KEY_LEN`] bytes and free of
/// control characters.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_name("key", key, "must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid_name("key", key, "too long"));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::invalid_name(
            "key",
            key,
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// A single store.
pub struct StoreEngine {
    name: String,
    entries: RwLock<HashMap<String, Entry>>,
    rng: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("name", &self.name)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl StoreEngine {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>, rng: Arc<dyn RandomSource>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            rng,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts or overwrites a scalar. Fails if a live list or set holds the key.
    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        if let Some(existing) = live_mut(&mut entries, key) {
            self.expect_kind(key, existing, EntryKind::Scalar)?;
        }
        entries.insert(key.to_string(), Entry::new(EntryValue::Scalar(value), ttl));
        Ok(())
    }

    /// Returns a scalar value.
    pub fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.value {
                EntryValue::Scalar(value) => Ok(value.clone()),
                other => Err(self.mismatch(key, EntryKind::Scalar, other.kind())),
            },
            _ => Err(Error::not_found(&self.name, key)),
        }
    }

    /// Removes a key of any kind. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        Ok(entries.remove(key).is_some_and(|entry| !entry.is_expired()))
    }

    /// Replaces the value of an existing scalar, keeping its expiry.
    pub fn update(&self, key: &str, value: String) -> Result<String> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        let Some(entry) = live_mut(&mut entries, key) else {
            return Err(Error::not_found(&self.name, key));
        };
        match &mut entry.value {
            EntryValue::Scalar(current) => {
                current.clone_from(&value);
                Ok(value)
            },
            other => Err(self.mismatch(key, EntryKind::Scalar, other.kind())),
        }
    }

    /// Live keys, sorted, optionally filtered by prefix.
    pub fn keys(&self, prefix: Option<&str>) -> Vec<String> {
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| {
                !entry.is_expired() && prefix.is_none_or(|p| key.starts_with(p))
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live `(key, value)` pairs, sorted by key.
    pub fn items(&self) -> Vec<(String, EntryValue)> {
        let entries = self.entries.read();
        let mut items: Vec<(String, EntryValue)> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    /// Prepends to a list, creating it if absent. Returns the new length.
    pub fn lpush(&self, key: &str, value: String) -> Result<usize> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        purge_if_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(EntryValue::List(VecDeque::new())));
        match &mut entry.value {
            EntryValue::List(items) => {
                items.push_front(value);
                Ok(items.len())
            },
            other => Err(self.mismatch(key, EntryKind::List, other.kind())),
        }
    }

    /// Removes and returns the head of a list.
    pub fn lpop(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        let Some(entry) = live_mut(&mut entries, key) else {
            return Err(Error::not_found(&self.name, key));
        };
        let popped = match &mut entry.value {
            EntryValue::List(items) => items.pop_front(),
            other => return Err(self.mismatch(key, EntryKind::List, other.kind())),
        };
        self.finish_pop(&mut entries, key, popped)
    }

    /// Adds a member to a set, creating it if absent. Returns whether it was new.
    pub fn sadd(&self, key: &str, value: String) -> Result<bool> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        purge_if_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(EntryValue::Set(BTreeSet::new())));
        match &mut entry.value {
            EntryValue::Set(members) => Ok(members.insert(value)),
            other => Err(self.mismatch(key, EntryKind::Set, other.kind())),
        }
    }

    /// Removes and returns a uniformly random member of a set.
    pub fn spop(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let mut entries = self.entries.write();
        let Some(entry) = live_mut(&mut entries, key) else {
            return Err(Error::not_found(&self.name, key));
        };
        let popped = match &mut entry.value {
            EntryValue::Set(members) if members.is_empty() => None,
            EntryValue::Set(members) => {
                let index = self.rng.pick_index(members.len());
                let chosen = members.iter().nth(index).cloned();
                if let Some(member) = &chosen {
                    members.remove(member);
                }
                chosen
            },
            other => return Err(self.mismatch(key, EntryKind::Set, other.kind())),
        };
        self.finish_pop(&mut entries, key, popped)
    }

    /// Point-in-time copy of all live entries.
    ///
    /// Holds the read lock only for the duration of the copy.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Replaces the whole key space, dropping entries that already expired.
    pub fn replace_all(&self, restored: BTreeMap<String, Entry>) {
        let fresh: HashMap<String, Entry> = restored
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired())
            .collect();
        *self.entries.write() = fresh;
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of physically stored entries (including not yet purged ones).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops empty collections after a pop and maps "nothing popped" to `NotFound`.
    fn finish_pop(
        &self,
        entries: &mut HashMap<String, Entry>,
        key: &str,
        popped: Option<String>,
    ) -> Result<String> {
        if entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_collection())
        {
            entries.remove(key);
        }
        popped.ok_or_else(|| Error::not_found(&self.name, key))
    }

    fn expect_kind(&self, key: &str, entry: &Entry, expected: EntryKind) -> Result<()> {
        if entry.kind() == expected {
            Ok(())
        } else {
            Err(self.mismatch(key, expected, entry.kind()))
        }
    }

    fn mismatch(&self, key: &str, expected: EntryKind, actual: EntryKind) -> Error {
        Error::type_mismatch(&self.name, key, expected.as_str(), actual.as_str())
    }
}

fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(Entry::is_expired) {
        entries.remove(key);
    }
}

fn live_mut<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    purge_if_expired(entries, key);
    entries.get_mut(key)
}
