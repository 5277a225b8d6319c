//! Backend selection and fallback.
//!
//! The selector owns the local engine and, optionally, a remote backend.
//! While the remote backend is healthy every command is sent to it under a
//! bounded timeout. A transport failure or timeout marks it degraded and the
//! same command is retried once against the local engine, so callers only see
//! an error when the local path fails too. While degraded, commands go
//! straight to the local engine until a background probe succeeds again.
//!
//! State written locally while degraded is not copied back to the remote
//! backend when it recovers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::backend::{Command, KvBackend, Reply};
use super::health::{BackendState, HealthCheckConfig, HealthState};
use super::memory::MemoryBackend;
use crate::error::{Error, Result};

/// Routes commands to the remote backend or the local engine.
pub struct BackendSelector {
    local: Arc<MemoryBackend>,
    remote: Option<Arc<dyn KvBackend>>,
    health: HealthState,
    config: HealthCheckConfig,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("remote", &self.remote.as_ref().map(|r| r.name()))
            .field("state", &self.health.state())
            .finish_non_exhaustive()
    }
}

impl BackendSelector {
    /// Creates a selector. The remote backend starts degraded until the first
    /// successful [`probe`](Self::probe).
    pub fn new(
        local: MemoryBackend,
        remote: Option<Arc<dyn KvBackend>>,
        config: HealthCheckConfig,
    ) -> Self {
        metrics::gauge!("rdict_backend_healthy").set(0.0);
        Self {
            local: Arc::new(local),
            remote,
            health: HealthState::new(false),
            config,
        }
    }

    /// Memory-only selector.
    pub fn memory_only(local: MemoryBackend) -> Self {
        Self::new(local, None, HealthCheckConfig::default())
    }

    /// The local engine.
    pub fn local(&self) -> &MemoryBackend {
        &self.local
    }

    /// Whether a remote backend is configured at all.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn state(&self) -> BackendState {
        self.health.state()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// The backend operations currently go to.
    pub fn current(&self) -> Arc<dyn KvBackend> {
        match self.healthy_remote() {
            Some(remote) => remote,
            None => Arc::clone(&self.local) as Arc<dyn KvBackend>,
        }
    }

    /// Name of the current backend (`"remote"` or `"memory"`).
    pub fn backend_name(&self) -> &'static str {
        self.current().name()
    }

    fn healthy_remote(&self) -> Option<Arc<dyn KvBackend>> {
        self.remote
            .as_ref()
            .filter(|_| self.health.is_healthy())
            .map(Arc::clone)
    }

    /// Runs a command, falling back to the local engine on remote failure.
    ///
    /// # Errors
    ///
    /// Caller errors (`NotFound`, `TypeMismatch`, `InvalidName`) are returned
    /// unchanged from whichever backend served the command.
    /// [`Error::BackendUnavailable`] is returned only when the local path
    /// failed as well.
    pub async fn dispatch(&self, command: &Command) -> Result<Reply> {
        let Some(remote) = self.healthy_remote() else {
            return self.dispatch_local(command, None).await;
        };

        let outcome = tokio::time::timeout(self.config.timeout, command.apply(remote.as_ref()))
            .await
            .unwrap_or_else(|_| {
                Err(Error::remote(format!(
                    "timed out after {}ms",
                    self.config.timeout.as_millis()
                )))
            });

        match outcome {
            Ok(reply) => {
                record_operation(command, remote.name());
                Ok(reply)
            },
            Err(err) if !err.is_transient() => Err(err),
            Err(err) => {
                if self.health.mark_degraded() {
                    metrics::gauge!("rdict_backend_healthy").set(0.0);
                }
                metrics::counter!("rdict_fallbacks_total", "op" => command.name()).increment(1);
                warn!(
                    op = command.name(),
                    error = %err,
                    "Remote backend failed, falling back to local engine"
                );
                self.dispatch_local(command, Some(err)).await
            },
        }
    }

    async fn dispatch_local(&self, command: &Command, remote_err: Option<Error>) -> Result<Reply> {
        match command.apply(self.local.as_ref()).await {
            Ok(reply) => {
                record_operation(command, self.local.name());
                Ok(reply)
            },
            Err(err) if err.is_caller_error() => Err(err),
            Err(err) => {
                let reason = match remote_err {
                    Some(remote_err) => format!("remote: {remote_err}; local: {err}"),
                    None => format!("remote degraded; local: {err}"),
                };
                warn!(op = command.name(), %reason, "Local engine failed");
                Err(Error::backend_unavailable(command.name(), reason))
            },
        }
    }

    /// Pings the remote backend and updates the health state.
    pub async fn probe(&self) -> BackendState {
        let Some(remote) = &self.remote else {
            return self.health.state();
        };

        let outcome = tokio::time::timeout(self.config.timeout, remote.ping())
            .await
            .unwrap_or_else(|_| Err(Error::remote("probe timed out")));

        match outcome {
            Ok(()) => {
                if self.health.mark_healthy() {
                    metrics::gauge!("rdict_backend_healthy").set(1.0);
                    info!("Remote backend healthy, routing operations to it");
                }
            },
            Err(err) => {
                if self.health.mark_degraded() {
                    metrics::gauge!("rdict_backend_healthy").set(0.0);
                    warn!(error = %err, "Remote backend unreachable, using local engine");
                } else {
                    debug!(
                        error = %err,
                        failures = self.health.failure_count(),
                        "Remote backend probe failed"
                    );
                }
            },
        }
        self.health.state()
    }

    /// Starts the periodic probe loop. Does nothing in memory-only mode.
    pub fn spawn_probe_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.remote.as_ref()?;
        let selector = Arc::clone(self);
        let interval = self.config.interval;
        info!(interval = ?interval, "Starting remote backend probe loop");
        Some(tokio::spawn(async move {
            run_probe_loop(selector, interval).await;
        }))
    }
}

async fn run_probe_loop(selector: Arc<BackendSelector>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the startup probe already ran.
    interval.tick().await;
    loop {
        interval.tick().await;
        selector.probe().await;
    }
}

fn record_operation(command: &Command, backend: &'static str) {
    metrics::counter!(
        "rdict_operations_total",
        "op" => command.name(),
        "backend" => backend
    )
    .increment(1);
}
