//! Search queries over a store and their cache fingerprints.
//!
//! A query is normalized first (text trimmed and lowercased, limit clamped),
//! then hashed into a [`Fingerprint`]. Two queries that differ only in the
//! order their parameters were supplied, or in the case and surrounding
//! whitespace of the text, share a fingerprint.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::error::{Error, Result};
use crate::services::kv::{EntryValue, validate_store_name};

/// Cache key of a normalized search query: blake3 over its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes a parameter set. The result does not depend on the order of
    /// `params`.
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        let canonical: BTreeMap<&str, String> = params.into_iter().collect();
        let mut hasher = blake3::Hasher::new();
        for (name, value) in &canonical {
            // Length-prefixed so no two parameter sets share an encoding.
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    #[cfg(test)]
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A search over one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub store: String,
    pub text: String,
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(store: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            text: text.into(),
            prefix: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validates the store and returns the canonical form of the query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an invalid store or a query whose
    /// text is empty after trimming.
    pub fn normalize(&self) -> Result<NormalizedQuery> {
        validate_store_name(&self.store)?;
        let text = self.text.trim().to_lowercase();
        if text.is_empty() {
            return Err(Error::invalid_name("query", &self.text, "must not be empty"));
        }
        let limit = self
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        Ok(NormalizedQuery {
            store: self.store.clone(),
            text,
            prefix: self.prefix.clone().filter(|p| !p.is_empty()),
            limit,
        })
    }
}

/// A validated query with lowercase text and a concrete limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub store: String,
    pub text: String,
    pub prefix: Option<String>,
    pub limit: usize,
}

impl NormalizedQuery {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut params = vec![
            ("store", self.store.clone()),
            ("text", self.text.clone()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(prefix) = &self.prefix {
            params.push(("prefix", prefix.clone()));
        }
        Fingerprint::from_params(params)
    }

    /// Whether an entry satisfies the query: its key has the prefix, and the
    /// text occurs in the key or in a scalar value (case-insensitive).
    pub fn matches(&self, key: &str, value: &EntryValue) -> bool {
        if self.prefix.as_deref().is_some_and(|p| !key.starts_with(p)) {
            return false;
        }
        if key.to_lowercase().contains(&self.text) {
            return true;
        }
        matches!(value, EntryValue::Scalar(scalar) if scalar.to_lowercase().contains(&self.text))
    }

    /// Filters `(key, value)` pairs into a result, sorted by key and truncated
    /// to the limit.
    pub fn evaluate(&self, mut items: Vec<(String, EntryValue)>) -> SearchResult {
        items.sort_by(|a, b| a.0.cmp(&b.0));
        let matching: Vec<SearchHit> = items
            .into_iter()
            .filter(|(key, value)| self.matches(key, value))
            .map(|(key, value)| SearchHit { key, value })
            .collect();
        let total = matching.len();
        let hits = matching.into_iter().take(self.limit).collect();
        SearchResult {
            store: self.store.clone(),
            query: self.text.clone(),
            total,
            hits,
        }
    }
}

/// One matching entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub key: String,
    #[serde(flatten)]
    pub value: EntryValue,
}

/// Matches for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub store: String,
    /// Normalized query text.
    pub query: String,
    /// Matches before truncation.
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Where a search answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Cache,
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn scalar(v: &str) -> EntryValue {
        EntryValue::Scalar(v.to_string())
    }

    #[test]
    fn test_fingerprint_ignores_parameter_order() {
        let a = Fingerprint::from_params([("store", "s".to_string()), ("text", "x".to_string())]);
        let b = Fingerprint::from_params([("text", "x".to_string()), ("store", "s".to_string())]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_boundaries() {
        let a = Fingerprint::from_params([("store", "ab".to_string()), ("text", "c".to_string())]);
        let b = Fingerprint::from_params([("store", "a".to_string()), ("text", "bc".to_string())]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalization_shares_fingerprint() {
        let a = SearchQuery::new("s", "  Laptop ").normalize().unwrap();
        let b = SearchQuery::new("s", "laptop").normalize().unwrap();
        assert_eq!(a.text, "laptop");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let other_store = SearchQuery::new("t", "laptop").normalize().unwrap();
        assert_ne!(a.fingerprint(), other_store.fingerprint());

        let limited = SearchQuery::new("s", "laptop").with_limit(5).normalize().unwrap();
        assert_ne!(a.fingerprint(), limited.fingerprint());
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(
            SearchQuery::new("s", "   ").normalize(),
            Err(Error::InvalidName { what: "query", .. })
        ));
        assert!(matches!(
            SearchQuery::new("bad store", "x").normalize(),
            Err(Error::InvalidName { what: "store", .. })
        ));
    }

    #[test]
    fn test_limit_is_clamped() {
        let q = SearchQuery::new("s", "x");
        assert_eq!(q.normalize().unwrap().limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(q.clone().with_limit(0).normalize().unwrap().limit, 1);
        assert_eq!(
            q.with_limit(10_000).normalize().unwrap().limit,
            MAX_SEARCH_LIMIT
        );
    }

    #[test]
    fn test_evaluate_filters_sorts_and_truncates() {
        let query = SearchQuery::new("s", "PHONE")
            .with_prefix("item:")
            .with_limit(2)
            .normalize()
            .unwrap();
        let items = vec![
            ("item:3".to_string(), scalar("Smartphone")),
            ("item:1".to_string(), scalar("phone case")),
            ("item:2".to_string(), scalar("laptop")),
            ("other:phone".to_string(), scalar("x")),
            ("item:phones".to_string(), EntryValue::Set(BTreeSet::new())),
        ];

        let result = query.evaluate(items);
        assert_eq!(result.total, 3);
        let keys: Vec<&str> = result.hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["item:1", "item:3"]);
        assert_eq!(result.query, "phone");
    }
}
