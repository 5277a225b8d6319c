//! Remote backend on a Redis-compatible data-structure server.
//!
//! Layout: every entry lives at `rdict:{store}:{key}` using the server's
//! native string, list and set types; store names are tracked in the set
//! `rdict:__stores__`. Scalar writes go through small Lua scripts so the type
//! check and the write happen in one server-side step.
//!
//! Transport failures, timeouts and unexpected server replies become
//! [`Error::Remote`], which the selector treats as a reason to fall back.
//! `WRONGTYPE` replies are caller errors and become [`Error::TypeMismatch`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult, Script};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::backend::{ExportedStores, KvBackend};
use super::entry::{Entry, EntryKind, EntryValue};
use crate::constants::{REMOTE_KEY_PREFIX, REMOTE_STORES_KEY};
use crate::error::{Error, Result};

const SCAN_BATCH: usize = 500;

const SET_SCRIPT: &str = r"
local t = redis.call('TYPE', KEYS[1])['ok']
if t ~= 'none' and t ~= 'string' then
  return redis.error_reply('WRONGTYPE ' .. t)
end
if ARGV[2] ~= '' then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
else
  redis.call('SET', KEYS[1], ARGV[1])
end
redis.call('SADD', KEYS[2], ARGV[3])
return 1
";

const UPDATE_SCRIPT: &str = r"
local t = redis.call('TYPE', KEYS[1])['ok']
if t == 'none' then
  return 0
end
if t ~= 'string' then
  return redis.error_reply('WRONGTYPE ' .. t)
end
redis.call('SET', KEYS[1], ARGV[1], 'KEEPTTL')
return 1
";

/// Backend talking to a Redis-compatible server over one multiplexed
/// connection.
///
/// The connection is opened lazily and dropped after a transport error, so
/// the next call (usually the health probe) reconnects.
pub struct RedisBackend {
    client: Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
    set_script: Script,
    update_script: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Creates a backend for the given connection URL without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL cannot be parsed.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url '{url}': {e}")))?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
            connect_timeout,
            set_script: Script::new(SET_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }
        let mut slot = self.conn.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::remote("connect timed out"))?
        .map_err(|e| Error::remote(format!("connect failed: {e}")))?;
        info!(addr = %self.client.get_connection_info().addr, "Connected to remote backend");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Maps a server error, dropping the cached connection on transport failures.
    async fn fail(&self, err: RedisError, store: &str, key: &str, expected: EntryKind) -> Error {
        if err.code() == Some("WRONGTYPE") {
            let actual = match err.detail() {
                Some(detail) => kind_from_type(detail),
                None => "unknown",
            };
            return Error::type_mismatch(store, key, expected.as_str(), actual);
        }
        self.transport(err).await
    }

    async fn transport(&self, err: RedisError) -> Error {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            debug!(error = %err, "Dropping remote connection");
            *self.conn.write().await = None;
        }
        Error::remote(err.to_string())
    }

    /// Returns the actual kind of a key for `WRONGTYPE` replies from native commands.
    async fn mismatch(
        &self,
        conn: &mut MultiplexedConnection,
        store: &str,
        key: &str,
        expected: EntryKind,
    ) -> Error {
        let actual: RedisResult<String> = redis::cmd("TYPE")
            .arg(data_key(store, key))
            .query_async(conn)
            .await;
        let actual = actual.map_or("unknown", |t| kind_from_type(&t));
        Error::type_mismatch(store, key, expected.as_str(), actual)
    }

    async fn scan_keys(
        &self,
        conn: &mut MultiplexedConnection,
        pattern: &str,
    ) -> Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let page: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await;
            let (next, batch) = match page {
                Ok(page) => page,
                Err(e) => return Err(self.transport(e).await),
            };
            found.extend(batch);
            if next == 0 {
                return Ok(found);
            }
            cursor = next;
        }
    }

    /// Reads one entry with its remaining lifetime. `None` if it vanished.
    async fn read_entry(
        &self,
        conn: &mut MultiplexedConnection,
        store: &str,
        key: &str,
    ) -> Result<Option<Entry>> {
        let full = data_key(store, key);
        let kind: RedisResult<String> =
            redis::cmd("TYPE").arg(&full).query_async(conn).await;
        let kind = match kind {
            Ok(kind) => kind,
            Err(e) => return Err(self.transport(e).await),
        };
        let value: RedisResult<Option<EntryValue>> = match kind.as_str() {
            "string" => {
                let scalar: RedisResult<Option<String>> =
                    redis::cmd("GET").arg(&full).query_async(conn).await;
                scalar.map(|v| v.map(EntryValue::Scalar))
            },
            "list" => {
                let items: RedisResult<Vec<String>> = redis::cmd("LRANGE")
                    .arg(&full)
                    .arg(0)
                    .arg(-1)
                    .query_async(conn)
                    .await;
                items.map(|v| (!v.is_empty()).then(|| EntryValue::List(VecDeque::from(v))))
            },
            "set" => {
                let members: RedisResult<BTreeSet<String>> =
                    redis::cmd("SMEMBERS").arg(&full).query_async(conn).await;
                members.map(|v| (!v.is_empty()).then_some(EntryValue::Set(v)))
            },
            _ => Ok(None),
        };
        let value = match value {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.transport(e).await),
        };
        let pttl: RedisResult<i64> =
            redis::cmd("PTTL").arg(&full).query_async(conn).await;
        let pttl = match pttl {
            Ok(pttl) => pttl,
            Err(e) => return Err(self.transport(e).await),
        };
        Ok(Some(Entry {
            value,
            expires_at: expiry_from_pttl(pttl, Utc::now()),
        }))
    }

    async fn store_entries(
        &self,
        conn: &mut MultiplexedConnection,
        store: &str,
    ) -> Result<BTreeMap<String, Entry>> {
        let prefix = data_key(store, "");
        let mut entries = BTreeMap::new();
        for full in self.scan_keys(conn, &scan_pattern(store, None)).await? {
            let Some(key) = full.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(entry) = self.read_entry(conn, store, key).await? {
                entries.insert(key.to_string(), entry);
            }
        }
        Ok(entries)
    }

    async fn register_store(&self, conn: &mut MultiplexedConnection, store: &str) -> Result<()> {
        let added: RedisResult<i64> = redis::cmd("SADD")
            .arg(REMOTE_STORES_KEY)
            .arg(store)
            .query_async(conn)
            .await;
        match added {
            Ok(_) => Ok(()),
            Err(e) => Err(self.transport(e).await),
        }
    }

    /// `StoreNotFound` unless the store is registered.
    async fn require_store(&self, conn: &mut MultiplexedConnection, store: &str) -> Result<()> {
        let known: RedisResult<bool> = redis::cmd("SISMEMBER")
            .arg(REMOTE_STORES_KEY)
            .arg(store)
            .query_async(conn)
            .await;
        match known {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::store_not_found(store)),
            Err(e) => Err(self.transport(e).await),
        }
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pong: RedisResult<String> =
            redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Ok(()),
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn set(
        &self,
        store: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.map(|ttl| ttl.as_millis().max(1).to_string()).unwrap_or_default();
        let done: RedisResult<i64> = self
            .set_script
            .key(data_key(store, key))
            .key(REMOTE_STORES_KEY)
            .arg(value)
            .arg(ttl_ms)
            .arg(store)
            .invoke_async(&mut conn)
            .await;
        match done {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e, store, key, EntryKind::Scalar).await),
        }
    }

    async fn get(&self, store: &str, key: &str) -> Result<String> {
        let mut conn = self.connection().await?;
        let value: RedisResult<Option<String>> = redis::cmd("GET")
            .arg(data_key(store, key))
            .query_async(&mut conn)
            .await;
        match value {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::not_found(store, key)),
            Err(e) if e.code() == Some("WRONGTYPE") => {
                Err(self.mismatch(&mut conn, store, key, EntryKind::Scalar).await)
            },
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: RedisResult<i64> = redis::cmd("DEL")
            .arg(data_key(store, key))
            .query_async(&mut conn)
            .await;
        match removed {
            Ok(n) => Ok(n > 0),
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn update(&self, store: &str, key: &str, value: String) -> Result<String> {
        let mut conn = self.connection().await?;
        let updated: RedisResult<i64> = self
            .update_script
            .key(data_key(store, key))
            .arg(&value)
            .invoke_async(&mut conn)
            .await;
        match updated {
            Ok(1) => Ok(value),
            Ok(_) => Err(Error::not_found(store, key)),
            Err(e) => Err(self.fail(e, store, key, EntryKind::Scalar).await),
        }
    }

    async fn keys(&self, store: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        self.require_store(&mut conn, store).await?;
        let full_prefix = data_key(store, "");
        let found = self.scan_keys(&mut conn, &scan_pattern(store, prefix)).await?;
        Ok(found
            .into_iter()
            .filter_map(|full| full.strip_prefix(&full_prefix).map(str::to_string))
            .collect())
    }

    async fn items(&self, store: &str) -> Result<Vec<(String, EntryValue)>> {
        let mut conn = self.connection().await?;
        self.require_store(&mut conn, store).await?;
        Ok(self
            .store_entries(&mut conn, store)
            .await?
            .into_iter()
            .map(|(key, entry)| (key, entry.value))
            .collect())
    }

    async fn lpush(&self, store: &str, key: &str, value: String) -> Result<usize> {
        let mut conn = self.connection().await?;
        let len: RedisResult<usize> = redis::cmd("LPUSH")
            .arg(data_key(store, key))
            .arg(value)
            .query_async(&mut conn)
            .await;
        match len {
            Ok(len) => {
                self.register_store(&mut conn, store).await?;
                Ok(len)
            },
            Err(e) if e.code() == Some("WRONGTYPE") => {
                Err(self.mismatch(&mut conn, store, key, EntryKind::List).await)
            },
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn lpop(&self, store: &str, key: &str) -> Result<String> {
        let mut conn = self.connection().await?;
        let head: RedisResult<Option<String>> = redis::cmd("LPOP")
            .arg(data_key(store, key))
            .query_async(&mut conn)
            .await;
        match head {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::not_found(store, key)),
            Err(e) if e.code() == Some("WRONGTYPE") => {
                Err(self.mismatch(&mut conn, store, key, EntryKind::List).await)
            },
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn sadd(&self, store: &str, key: &str, value: String) -> Result<bool> {
        let mut conn = self.connection().await?;
        let added: RedisResult<i64> = redis::cmd("SADD")
            .arg(data_key(store, key))
            .arg(value)
            .query_async(&mut conn)
            .await;
        match added {
            Ok(added) => {
                self.register_store(&mut conn, store).await?;
                Ok(added == 1)
            },
            Err(e) if e.code() == Some("WRONGTYPE") => {
                Err(self.mismatch(&mut conn, store, key, EntryKind::Set).await)
            },
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn spop(&self, store: &str, key: &str) -> Result<String> {
        let mut conn = self.connection().await?;
        let member: RedisResult<Option<String>> = redis::cmd("SPOP")
            .arg(data_key(store, key))
            .query_async(&mut conn)
            .await;
        match member {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::not_found(store, key)),
            Err(e) if e.code() == Some("WRONGTYPE") => {
                Err(self.mismatch(&mut conn, store, key, EntryKind::Set).await)
            },
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn create_store(&self, store: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.register_store(&mut conn, store).await
    }

    async fn delete_store(&self, store: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let keys = self.scan_keys(&mut conn, &scan_pattern(store, None)).await?;
        let had_keys = !keys.is_empty();
        let keys: Vec<String> = keys.into_iter().collect();
        for batch in keys.chunks(SCAN_BATCH) {
            let deleted: RedisResult<i64> =
                redis::cmd("DEL").arg(batch).query_async(&mut conn).await;
            if let Err(e) = deleted {
                return Err(self.transport(e).await);
            }
        }
        let removed: RedisResult<i64> = redis::cmd("SREM")
            .arg(REMOTE_STORES_KEY)
            .arg(store)
            .query_async(&mut conn)
            .await;
        match removed {
            Ok(n) => Ok(n > 0 || had_keys),
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let stores: RedisResult<BTreeSet<String>> = redis::cmd("SMEMBERS")
            .arg(REMOTE_STORES_KEY)
            .query_async(&mut conn)
            .await;
        match stores {
            Ok(stores) => Ok(stores.into_iter().collect()),
            Err(e) => Err(self.transport(e).await),
        }
    }

    async fn export(&self) -> Result<ExportedStores> {
        let stores = self.list_stores().await?;
        let mut conn = self.connection().await?;
        let mut exported = ExportedStores::new();
        for store in stores {
            let entries = self.store_entries(&mut conn, &store).await?;
            exported.insert(store, entries);
        }
        Ok(exported)
    }
}

/// Full server key of an entry.
fn data_key(store: &str, key: &str) -> String {
    format!("{REMOTE_KEY_PREFIX}:{store}:{key}")
}

/// `SCAN MATCH` pattern for a store, optionally narrowed by a key prefix.
fn scan_pattern(store: &str, prefix: Option<&str>) -> String {
    let mut pattern = escape_glob(&data_key(store, ""));
    if let Some(prefix) = prefix {
        pattern.push_str(&escape_glob(prefix));
    }
    pattern.push('*');
    pattern
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Entry kind label for a server `TYPE` reply.
fn kind_from_type(server_type: &str) -> &'static str {
    match server_type.trim() {
        "string" => EntryKind::Scalar.as_str(),
        "list" => EntryKind::List.as_str(),
        "set" => EntryKind::Set.as_str(),
        _ => "unknown",
    }
}

/// Absolute expiry for a `PTTL` reply (`-1` persistent, `-2` missing).
fn expiry_from_pttl(pttl: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (pttl >= 0).then(|| now + chrono::Duration::milliseconds(pttl))
}
