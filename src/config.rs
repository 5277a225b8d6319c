//! Configuration for the rdict service.
//!
//! Settings are loaded from an optional TOML file and then overridden from
//! `RDICT_*` environment variables:
//!
//! - [`Config`] - Root configuration struct
//! - [`ServerConfig`] - HTTP listener
//! - [`BackendConfig`] - Remote backend connection and health probing
//! - [`CacheConfig`] - Search cache bounds
//! - [`SnapshotConfig`] - Snapshot threshold and destination
//! - [`LoggingConfig`] - Log level and format
//!
//! Every section has defaults suitable for local development; an empty file
//! (or no file at all) yields a memory-only service on `127.0.0.1:8000`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Store targeted by the `/command` endpoint.
    pub default_store: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            default_store: constants::DEFAULT_STORE.to_string(),
        }
    }
}

/// Remote backend settings. Without `redis_url` the service runs memory-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub redis_url: Option<String>,
    /// Bound on every remote call, in milliseconds.
    pub timeout_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            timeout_ms: constants::DEFAULT_BACKEND_TIMEOUT_MS,
            probe_interval_secs: constants::DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Search cache bounds. `capacity = 0` disables caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_CACHE_CAPACITY,
            ttl_secs: constants::DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Snapshot pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Mutations between snapshots.
    pub threshold: u64,
    /// Bucket directory of the filesystem object store.
    pub bucket: PathBuf,
    /// Object key inside the bucket.
    pub key: String,
    /// Run threshold snapshots on a spawned task instead of inline.
    pub background: bool,
    pub restore_on_boot: bool,
    /// Deadline for reading every entry out of the current backend.
    pub export_timeout_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: constants::DEFAULT_SNAPSHOT_THRESHOLD,
            bucket: PathBuf::from(constants::DEFAULT_SNAPSHOT_BUCKET),
            key: constants::DEFAULT_SNAPSHOT_KEY.to_string(),
            background: true,
            restore_on_boot: false,
            export_timeout_secs: constants::DEFAULT_SNAPSHOT_EXPORT_TIMEOUT_SECS,
        }
    }
}

impl SnapshotConfig {
    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Loads the TOML file at `path` (if given) and applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parses a TOML file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `RDICT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RDICT_REDIS_URL") {
            let url = url.trim().to_string();
            self.backend.redis_url = (!url.is_empty()).then_some(url);
        }
        if let Some(host) = lookup("RDICT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RDICT_PORT") {
            self.server.port = parse_env("RDICT_PORT", &port)?;
        }
        if let Some(threshold) = lookup("RDICT_SNAPSHOT_THRESHOLD") {
            self.snapshot.threshold = parse_env("RDICT_SNAPSHOT_THRESHOLD", &threshold)?;
        }
        if let Some(bucket) = lookup("RDICT_SNAPSHOT_BUCKET") {
            self.snapshot.bucket = PathBuf::from(bucket);
        }
        if let Some(key) = lookup("RDICT_SNAPSHOT_KEY") {
            self.snapshot.key = key;
        }
        if let Some(capacity) = lookup("RDICT_CACHE_CAPACITY") {
            self.cache.capacity = parse_env("RDICT_CACHE_CAPACITY", &capacity)?;
        }
        if let Some(ttl) = lookup("RDICT_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("RDICT_CACHE_TTL_SECS", &ttl)?;
        }
        if let Some(level) = lookup("RDICT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("RDICT_LOG_JSON") {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Validates the configuration, returning warnings or an error listing
    /// every problem found.
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            errors.push(
                "server.port cannot be 0. Use a valid port number (1-65535)".to_string(),
            );
        }
        if self.server.host.trim().is_empty() {
            errors.push("server.host cannot be empty".to_string());
        }
        if let Err(e) = crate::services::kv::validate_store_name(&self.server.default_store) {
            errors.push(format!("server.default_store is invalid: {e}"));
        }

        if self.backend.timeout_ms == 0 {
            errors.push("backend.timeout_ms must be greater than 0".to_string());
        }
        if self.backend.probe_interval_secs == 0 {
            errors.push("backend.probe_interval_secs must be greater than 0".to_string());
        }
        match &self.backend.redis_url {
            Some(url) if !url.starts_with("redis://") && !url.starts_with("rediss://") => {
                errors.push(format!(
                    "backend.redis_url must start with redis:// or rediss:// (got: '{url}')"
                ));
            },
            None => warnings.push(
                "backend.redis_url is not set; running in memory-only mode".to_string(),
            ),
            _ => {},
        }

        if self.cache.capacity == 0 {
            warnings.push("cache.capacity is 0; search caching is disabled".to_string());
        }
        if self.cache.ttl_secs == 0 {
            warnings.push("cache.ttl_secs is 0; cached results expire immediately".to_string());
        }

        if self.snapshot.enabled {
            if self.snapshot.threshold == 0 {
                errors.push("snapshot.threshold must be at least 1".to_string());
            }
            if self.snapshot.export_timeout_secs == 0 {
                errors.push("snapshot.export_timeout_secs must be greater than 0".to_string());
            }
            if let Err(e) = crate::services::objects::normalize_key(&self.snapshot.key) {
                errors.push(format!("snapshot.key is invalid: {e}"));
            }
            if self.snapshot.bucket.is_file() {
                errors.push(format!(
                    "snapshot.bucket is not a directory: {}",
                    self.snapshot.bucket.display()
                ));
            }
        } else if self.snapshot.restore_on_boot {
            warnings.push(
                "snapshot.restore_on_boot is set but snapshots are disabled".to_string(),
            );
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {name} ('{raw}'): {e}"))
}
