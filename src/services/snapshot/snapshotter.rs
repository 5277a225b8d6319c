//! Export, encode and commit snapshots; load and restore them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::counter::{MutationCounter, SnapshotTicket};
use super::format::SnapshotState;
use crate::constants::DEFAULT_SNAPSHOT_EXPORT_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::services::kv::{KvBackend, StoreRegistry};
use crate::services::objects::ObjectStore;

/// Outcome of a committed snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub location: String,
    pub key: String,
    pub bytes: u64,
    pub stores: usize,
    pub entries: usize,
    /// Mutations covered by this snapshot's trigger.
    pub mutations: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub stores: usize,
    pub entries: usize,
    /// Entries whose expiry passed while the snapshot sat in storage.
    pub dropped_expired: usize,
    pub created_at: DateTime<Utc>,
}

/// Writes snapshots to one object key of a bucket.
pub struct Snapshotter {
    objects: Arc<dyn ObjectStore>,
    key: String,
    counter: MutationCounter,
    export_timeout: Duration,
}

impl std::fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshotter")
            .field("location", &self.objects.location())
            .field("key", &self.key)
            .field("counter", &self.counter)
            .field("export_timeout", &self.export_timeout)
            .finish()
    }
}

impl Snapshotter {
    pub fn new(objects: Arc<dyn ObjectStore>, key: impl Into<String>, threshold: u64) -> Self {
        Self {
            objects,
            key: key.into(),
            counter: MutationCounter::new(threshold),
            export_timeout: Duration::from_secs(DEFAULT_SNAPSHOT_EXPORT_TIMEOUT_SECS),
        }
    }

    /// Bounds how long one export of the source backend may take.
    #[must_use]
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn counter(&self) -> &MutationCounter {
        &self.counter
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Counts a successful mutation; returns a ticket when a snapshot is due.
    pub fn observe_mutation(&self) -> Option<SnapshotTicket> {
        self.counter.record()
    }

    /// Snapshots immediately, ignoring the counter's threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotFailure`] if another snapshot is in flight or
    /// the export or commit fails.
    pub async fn snapshot_now(&self, source: &dyn KvBackend) -> Result<SnapshotInfo> {
        let ticket = self
            .counter
            .try_begin()
            .ok_or_else(|| Error::snapshot_failure("a snapshot is already in progress"))?;
        self.run(ticket, source).await
    }

    /// Runs one snapshot for a ticket and settles the counter.
    ///
    /// On failure the counter keeps its value, so the next mutation triggers
    /// another attempt. The failure is logged and counted here; callers on
    /// the mutation path can drop the error.
    pub async fn run(
        &self,
        ticket: SnapshotTicket,
        source: &dyn KvBackend,
    ) -> Result<SnapshotInfo> {
        let started = Instant::now();
        let mutations = ticket.observed();
        match self.write(source, mutations).await {
            Ok(info) => {
                self.counter.complete(ticket, true);
                metrics::counter!("rdict_snapshots_total", "outcome" => "success").increment(1);
                info!(
                    key = %info.key,
                    stores = info.stores,
                    entries = info.entries,
                    bytes = info.bytes,
                    mutations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Snapshot committed"
                );
                Ok(info)
            },
            Err(err) => {
                self.counter.complete(ticket, false);
                metrics::counter!("rdict_snapshots_total", "outcome" => "failure").increment(1);
                warn!(
                    key = %self.key,
                    pending = self.counter.count(),
                    error = %err,
                    "Snapshot failed, will retry on next mutation"
                );
                Err(match err {
                    Error::SnapshotFailure { .. } => err,
                    other => Error::snapshot_failure(other.to_string()),
                })
            },
        }
    }

    async fn write(&self, source: &dyn KvBackend, mutations: u64) -> Result<SnapshotInfo> {
        // Point-in-time copy; store locks are released once this returns.
        let stores = tokio::time::timeout(self.export_timeout, source.export())
            .await
            .map_err(|_| {
                Error::snapshot_failure(format!(
                    "export from {} timed out after {}ms",
                    source.name(),
                    self.export_timeout.as_millis()
                ))
            })??;
        let state = SnapshotState::capture(stores);
        let payload = state.encode()?;
        debug!(bytes = payload.len(), source = source.name(), "Snapshot encoded");

        let meta = self
            .objects
            .put(&self.key, &payload)
            .await
            .map_err(|e| {
                Error::snapshot_failure(format!("commit to '{}' failed: {e:#}", self.key))
            })?;

        Ok(SnapshotInfo {
            location: self.objects.location(),
            key: meta.key,
            bytes: meta.size,
            stores: state.store_count(),
            entries: state.entry_count(),
            mutations,
            created_at: state.created_at,
        })
    }

    /// Reads and decodes the stored snapshot. `Ok(None)` if there is none.
    ///
    /// # Errors
    ///
    /// [`Error::SnapshotFailure`] when the bucket cannot be read (worth
    /// retrying), [`Error::IncompatibleSnapshot`] or [`Error::Serialization`]
    /// for payloads that can never be restored.
    pub async fn load(&self) -> Result<Option<SnapshotState>> {
        let object = self
            .objects
            .get(&self.key)
            .await
            .map_err(|e| {
                Error::snapshot_failure(format!("read of '{}' failed: {e:#}", self.key))
            })?;
        let Some((payload, meta)) = object else {
            return Ok(None);
        };
        debug!(key = %meta.key, bytes = meta.size, "Snapshot loaded");
        SnapshotState::decode(&payload).map(Some)
    }

    /// Replaces the registry's contents with the stored snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot exists; the registry is left
    /// untouched in that case and on every error.
    pub async fn restore_into(&self, registry: &StoreRegistry) -> Result<Option<RestoreSummary>> {
        let Some(mut state) = self.load().await? else {
            info!(key = %self.key, "No snapshot to restore");
            return Ok(None);
        };
        let dropped_expired = state.drop_expired_at(Utc::now());
        let summary = RestoreSummary {
            stores: state.store_count(),
            entries: state.entry_count(),
            dropped_expired,
            created_at: state.created_at,
        };
        registry.replace_all(state.stores)?;
        self.counter.reset();
        info!(
            stores = summary.stores,
            entries = summary.entries,
            dropped_expired,
            created_at = %summary.created_at,
            "Snapshot restored"
        );
        Ok(Some(summary))
    }
}
