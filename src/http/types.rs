//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::services::kv::EntryValue;

// =============================================================================
// Stores and keys
// =============================================================================

#[derive(Debug, Serialize)]
pub struct StoreResponse {
    pub ok: bool,
    pub store: String,
}

#[derive(Debug, Serialize)]
pub struct StoreDeletedResponse {
    pub ok: bool,
    pub deleted: String,
}

/// Body of `POST /stores/{store}/set`.
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Body of `PUT /stores/{store}/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ValueResponse {
    pub ok: bool,
    pub store: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub deleted: bool,
    pub store: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct KeysQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub store: String,
    pub count: usize,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemView {
    pub key: String,
    #[serde(flatten)]
    pub value: EntryValue,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    pub store: String,
    pub size: usize,
    pub items: Vec<ItemView>,
}

// =============================================================================
// List / set commands
// =============================================================================

/// Body of `POST /command`.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// `LPUSH`, `LPOP`, `SADD` (alias `SPUSH`) or `SPOP`, case-insensitive.
    pub command: String,
    /// Key of the list or set.
    pub stack_name: String,
    #[serde(default)]
    pub value: Option<String>,
    /// Defaults to the configured default store.
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<bool>,
    /// Popped member; `null` when the list or set was empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Option<String>>,
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub store: Option<String>,
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: &'static str,
    pub message: String,
}
