//! Shared limits and defaults.

use std::time::Duration;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Maximum store name length in bytes.
pub const MAX_STORE_NAME_LEN: usize = 128;

/// Store used by the `/command` endpoint when none is given.
pub const DEFAULT_STORE: &str = "default";

/// Search cache capacity (records).
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Search cache record lifetime.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Mutations between two snapshots.
pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 100;

/// Default snapshot bucket (a directory for the filesystem object store).
pub const DEFAULT_SNAPSHOT_BUCKET: &str = "./data/snapshots";

/// Default object key of the snapshot inside the bucket.
pub const DEFAULT_SNAPSHOT_KEY: &str = "rdict/snapshot.json";

/// Upper bound on exporting the current backend for one snapshot.
pub const DEFAULT_SNAPSHOT_EXPORT_TIMEOUT_SECS: u64 = 30;

/// Snapshot payload format written by this build.
pub const SNAPSHOT_FORMAT_VERSION: u64 = 1;

/// Search results returned when the query sets no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Upper bound on a search limit.
pub const MAX_SEARCH_LIMIT: usize = 250;

/// Per-call timeout for remote backend operations.
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;

/// Interval between remote backend health probes.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

/// Prefix of every remote key.
pub const REMOTE_KEY_PREFIX: &str = "rdict";

/// Remote set holding the known store names.
pub const REMOTE_STORES_KEY: &str = "rdict:__stores__";

/// Maximum object size accepted by the object store (64 MiB).
pub const MAX_OBJECT_SIZE: u64 = 64 * 1024 * 1024;

/// Interval between sweeps of expired local entries.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Timeout for graceful HTTP shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
