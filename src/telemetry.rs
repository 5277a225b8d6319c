//! Logging and metrics setup for the binary.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Installs the Prometheus recorder and returns the handle used to render
/// `/metrics`.
pub fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "rdict_operations_total",
        "Store operations by operation name and serving backend"
    );
    metrics::describe_counter!(
        "rdict_fallbacks_total",
        "Remote failures recovered on the local engine"
    );
    metrics::describe_counter!("rdict_cache_hits_total", "Search cache hits");
    metrics::describe_counter!("rdict_cache_misses_total", "Search cache misses");
    metrics::describe_counter!(
        "rdict_cache_evictions_total",
        "Search cache records evicted for capacity"
    );
    metrics::describe_counter!("rdict_snapshots_total", "Snapshot attempts by outcome");
    metrics::describe_gauge!(
        "rdict_backend_healthy",
        "1 when the remote backend serves requests, 0 when on the local engine"
    );
}
