//! Application context.
//!
//! [`AppContext`] owns the backend selector, the search cache and the
//! snapshotter. Every store operation goes through [`AppContext::execute`]:
//!
//! ```text
//! Command ──validate──▶ BackendSelector::dispatch ──changed state──▶ Snapshotter
//!                              │                                   (counter)
//!                   remote ◀───┴───▶ local fallback
//! ```
//!
//! Searches consult the [`SearchCache`] first and fall through to an `items`
//! scan on the current backend. Cached results are not invalidated by
//! mutations; they go stale for at most the cache TTL.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reliability::{RetryConfig, retry_async};
use crate::services::cache::{CacheStats, SearchCache};
use crate::services::kv::{
    BackendSelector, BackendState, Command, EntryValue, HealthCheckConfig, KvBackend,
    MemoryBackend, RedisBackend, Reply,
};
use crate::services::objects::FilesystemObjectStore;
use crate::services::search::{SearchQuery, SearchResult, SearchSource};
use crate::services::snapshot::{
    RestoreSummary, SnapshotInfo, SnapshotPhase, SnapshotTicket, Snapshotter,
};

/// Read-only status of the service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    /// `"remote"` or `"memory"`.
    pub backend: &'static str,
    pub state: BackendState,
    pub stores: Vec<String>,
    pub cache: CacheStats,
    /// Milliseconds since the remote backend was last probed or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotStatus>,
}

/// Snapshot counter as reported on the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    pub phase: SnapshotPhase,
    pub pending_mutations: u64,
    pub threshold: u64,
    pub key: String,
}

/// Search answer and where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub source: SearchSource,
    #[serde(flatten)]
    pub result: SearchResult,
}

/// Shared state of a running service.
pub struct AppContext {
    selector: Arc<BackendSelector>,
    cache: SearchCache<SearchResult>,
    snapshotter: Option<Arc<Snapshotter>>,
    background_snapshots: bool,
    default_store: String,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("selector", &self.selector)
            .field("snapshotter", &self.snapshotter)
            .field("default_store", &self.default_store)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Assembles a context from parts. Threshold snapshots run inline.
    pub fn new(
        selector: Arc<BackendSelector>,
        cache: SearchCache<SearchResult>,
        snapshotter: Option<Arc<Snapshotter>>,
    ) -> Self {
        Self {
            selector,
            cache,
            snapshotter,
            background_snapshots: false,
            default_store: crate::constants::DEFAULT_STORE.to_string(),
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Memory-only context with default cache bounds and no snapshots.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(BackendSelector::memory_only(MemoryBackend::new())),
            SearchCache::new(
                crate::constants::DEFAULT_CACHE_CAPACITY,
                Duration::from_secs(crate::constants::DEFAULT_CACHE_TTL_SECS),
            ),
            None,
        )
    }

    #[must_use]
    pub fn with_background_snapshots(mut self, background: bool) -> Self {
        self.background_snapshots = background;
        self
    }

    #[must_use]
    pub fn with_default_store(mut self, store: impl Into<String>) -> Self {
        self.default_store = store.into();
        self
    }

    /// Builds the context described by `config`: connects (lazily) to the
    /// remote backend, probes it once, opens the snapshot bucket and starts
    /// the probe loop and the expiry sweep.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let remote: Option<Arc<dyn KvBackend>> = match &config.backend.redis_url {
            Some(url) => Some(Arc::new(RedisBackend::new(url, config.backend.timeout())?)),
            None => None,
        };
        let selector = Arc::new(BackendSelector::new(
            MemoryBackend::new(),
            remote,
            HealthCheckConfig {
                interval: config.backend.probe_interval(),
                timeout: config.backend.timeout(),
            },
        ));

        if selector.has_remote() {
            let state = selector.probe().await;
            info!(state = ?state, backend = selector.backend_name(), "Startup probe finished");
        } else {
            info!("No remote backend configured, running memory-only");
        }

        let snapshotter = if config.snapshot.enabled {
            let bucket = FilesystemObjectStore::open(&config.snapshot.bucket)?;
            info!(
                bucket = %config.snapshot.bucket.display(),
                key = %config.snapshot.key,
                threshold = config.snapshot.threshold,
                "Snapshots enabled"
            );
            Some(Arc::new(
                Snapshotter::new(
                    Arc::new(bucket),
                    config.snapshot.key.clone(),
                    config.snapshot.threshold,
                )
                .with_export_timeout(config.snapshot.export_timeout()),
            ))
        } else {
            None
        };

        let context = Self::new(
            Arc::clone(&selector),
            SearchCache::new(config.cache.capacity, config.cache.ttl()),
            snapshotter,
        )
        .with_background_snapshots(config.snapshot.background)
        .with_default_store(config.server.default_store.clone());
        {
            let mut tasks = context.background_tasks.lock();
            tasks.extend(selector.spawn_probe_loop());
            tasks.push(
                selector
                    .local()
                    .registry()
                    .spawn_expiry_sweep(crate::constants::EXPIRY_SWEEP_INTERVAL),
            );
        }
        Ok(context)
    }

    pub fn selector(&self) -> &Arc<BackendSelector> {
        &self.selector
    }

    pub fn cache(&self) -> &SearchCache<SearchResult> {
        &self.cache
    }

    pub fn snapshotter(&self) -> Option<&Arc<Snapshotter>> {
        self.snapshotter.as_ref()
    }

    /// Store targeted by `/command`.
    pub fn default_store(&self) -> &str {
        &self.default_store
    }

    /// Validates and dispatches a command, then counts it if it changed
    /// stored state.
    ///
    /// # Errors
    ///
    /// Caller errors and [`Error::BackendUnavailable`]. Snapshot failures are
    /// never returned here.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        command.validate()?;
        let reply = self.selector.dispatch(&command).await?;
        if command.mutated(&reply) {
            self.after_mutation().await;
        }
        Ok(reply)
    }

    async fn after_mutation(&self) {
        let Some(snapshotter) = &self.snapshotter else {
            return;
        };
        let Some(ticket) = snapshotter.observe_mutation() else {
            return;
        };
        debug!(
            mutations = ticket.observed(),
            background = self.background_snapshots,
            "Snapshot threshold reached"
        );
        if self.background_snapshots {
            let snapshotter = Arc::clone(snapshotter);
            let selector = Arc::clone(&self.selector);
            tokio::spawn(async move {
                run_snapshot(&snapshotter, ticket, &selector).await;
            });
        } else {
            run_snapshot(snapshotter, ticket, &self.selector).await;
        }
    }

    pub async fn set(
        &self,
        store: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.execute(Command::Set {
            store: store.to_string(),
            key: key.to_string(),
            value,
            ttl,
        })
        .await?
        .into_done()
    }

    pub async fn get(&self, store: &str, key: &str) -> Result<String> {
        self.execute(Command::Get {
            store: store.to_string(),
            key: key.to_string(),
        })
        .await?
        .into_value()
    }

    pub async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        self.execute(Command::Delete {
            store: store.to_string(),
            key: key.to_string(),
        })
        .await?
        .into_flag()
    }

    pub async fn update(&self, store: &str, key: &str, value: String) -> Result<String> {
        self.execute(Command::Update {
            store: store.to_string(),
            key: key.to_string(),
            value,
        })
        .await?
        .into_value()
    }

    pub async fn keys(&self, store: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        self.execute(Command::Keys {
            store: store.to_string(),
            prefix: prefix.map(str::to_string),
        })
        .await?
        .into_keys()
    }

    pub async fn items(&self, store: &str) -> Result<Vec<(String, EntryValue)>> {
        self.execute(Command::Items {
            store: store.to_string(),
        })
        .await?
        .into_items()
    }

    pub async fn lpush(&self, store: &str, key: &str, value: String) -> Result<usize> {
        self.execute(Command::LPush {
            store: store.to_string(),
            key: key.to_string(),
            value,
        })
        .await?
        .into_length()
    }

    pub async fn lpop(&self, store: &str, key: &str) -> Result<String> {
        self.execute(Command::LPop {
            store: store.to_string(),
            key: key.to_string(),
        })
        .await?
        .into_value()
    }

    pub async fn sadd(&self, store: &str, key: &str, value: String) -> Result<bool> {
        self.execute(Command::SAdd {
            store: store.to_string(),
            key: key.to_string(),
            value,
        })
        .await?
        .into_flag()
    }

    pub async fn spop(&self, store: &str, key: &str) -> Result<String> {
        self.execute(Command::SPop {
            store: store.to_string(),
            key: key.to_string(),
        })
        .await?
        .into_value()
    }

    pub async fn create_store(&self, store: &str) -> Result<()> {
        self.execute(Command::CreateStore {
            store: store.to_string(),
        })
        .await?
        .into_done()
    }

    pub async fn delete_store(&self, store: &str) -> Result<bool> {
        self.execute(Command::DeleteStore {
            store: store.to_string(),
        })
        .await?
        .into_flag()
    }

    pub async fn list_stores(&self) -> Result<Vec<String>> {
        self.execute(Command::ListStores).await?.into_keys()
    }

    /// Answers a search from the cache, or scans the store and caches the
    /// result.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let normalized = query.normalize()?;
        let fingerprint = normalized.fingerprint();
        if let Some(result) = self.cache.lookup(&fingerprint) {
            debug!(
                store = %normalized.store,
                fingerprint = %fingerprint,
                "Search served from cache"
            );
            return Ok(SearchOutcome {
                source: SearchSource::Cache,
                result,
            });
        }

        let items = self.items(&normalized.store).await?;
        let result = normalized.evaluate(items);
        debug!(
            store = %normalized.store,
            total = result.total,
            fingerprint = %fingerprint,
            "Search computed from store"
        );
        self.cache.insert(fingerprint, result.clone());
        Ok(SearchOutcome {
            source: SearchSource::Store,
            result,
        })
    }

    /// Current status. Never fails; a store listing error yields no names.
    pub async fn health(&self) -> HealthReport {
        let stores = self.list_stores().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list stores for health report");
            Vec::new()
        });
        HealthReport {
            status: "up",
            backend: self.selector.backend_name(),
            state: self.selector.state(),
            stores,
            cache: self.cache.stats(),
            last_check_ms: self
                .selector
                .health()
                .since_last_check()
                .map(|elapsed| elapsed.as_millis() as u64),
            snapshot: self.snapshotter.as_ref().map(|s| SnapshotStatus {
                phase: s.counter().phase(),
                pending_mutations: s.counter().count(),
                threshold: s.counter().threshold(),
                key: s.key().to_string(),
            }),
        }
    }

    /// Snapshots the current backend now, regardless of the counter.
    pub async fn snapshot_now(&self) -> Result<SnapshotInfo> {
        let snapshotter = self.require_snapshotter()?;
        let backend = self.selector.current();
        snapshotter.snapshot_now(backend.as_ref()).await
    }

    /// Replaces the local engine's stores with the stored snapshot and drops
    /// every cached search. `Ok(None)` when there is no snapshot.
    pub async fn restore(&self) -> Result<Option<RestoreSummary>> {
        let snapshotter = self.require_snapshotter()?;
        let summary = snapshotter
            .restore_into(self.selector.local().registry())
            .await?;
        if summary.is_some() {
            self.cache.clear();
        }
        Ok(summary)
    }

    /// [`restore`](Self::restore), retrying bucket read failures with backoff.
    /// Format errors are not retried.
    pub async fn restore_with_retry(&self, retry: RetryConfig) -> Result<Option<RestoreSummary>> {
        retry_async(
            retry,
            "snapshot restore",
            || self.restore(),
            |e| matches!(e, Error::SnapshotFailure { .. }),
        )
        .await
    }

    /// Drops all local stores, cached searches and pending mutation counts.
    pub fn reset(&self) {
        self.selector.local().registry().clear();
        self.cache.clear();
        if let Some(snapshotter) = &self.snapshotter {
            snapshotter.counter().reset();
        }
    }

    /// Stops the probe loop and the expiry sweep.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.background_tasks.lock());
        if !tasks.is_empty() {
            for task in &tasks {
                task.abort();
            }
            debug!(tasks = tasks.len(), "Background tasks stopped");
        }
    }

    fn require_snapshotter(&self) -> Result<&Arc<Snapshotter>> {
        self.snapshotter
            .as_ref()
            .ok_or_else(|| Error::snapshot_failure("snapshots are disabled"))
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_snapshot(
    snapshotter: &Snapshotter,
    ticket: SnapshotTicket,
    selector: &BackendSelector,
) {
    let backend = selector.current();
    // Failures are logged and counted by the snapshotter; the counter keeps
    // its value so the next mutation retries. A cancelled run releases the
    // ticket on drop with the same effect.
    let _ = snapshotter.run(ticket, backend.as_ref()).await;
}
