//! Tests for backend selection and fallback.

use super::*;
use crate::error::Error;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

const UP: u8 = 0;
const DOWN: u8 = 1;
const HANG: u8 = 2;

/// Remote stand-in that can be switched between working, refusing and hanging.
struct FlakyBackend {
    inner: MemoryBackend,
    mode: AtomicU8,
    calls: AtomicUsize,
}

impl FlakyBackend {
    fn new(mode: u8) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            mode: AtomicU8::new(mode),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_mode(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> crate::error::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            DOWN => Err(Error::remote("connection refused")),
            HANG => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::remote("unreachable"))
            },
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn ping(&self) -> crate::error::Result<()> {
        self.gate().await
    }

    async fn set(
        &self,
        store: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> crate::error::Result<()> {
        self.gate().await?;
        self.inner.set(store, key, value, ttl).await
    }

    async fn get(&self, store: &str, key: &str) -> crate::error::Result<String> {
        self.gate().await?;
        self.inner.get(store, key).await
    }

    async fn delete(&self, store: &str, key: &str) -> crate::error::Result<bool> {
        self.gate().await?;
        self.inner.delete(store, key).await
    }

    async fn update(&self, store: &str, key: &str, value: String) -> crate::error::Result<String> {
        self.gate().await?;
        self.inner.update(store, key, value).await
    }

    async fn keys(&self, store: &str, prefix: Option<&str>) -> crate::error::Result<Vec<String>> {
        self.gate().await?;
        self.inner.keys(store, prefix).await
    }

    async fn items(&self, store: &str) -> crate::error::Result<Vec<(String, EntryValue)>> {
        self.gate().await?;
        self.inner.items(store).await
    }

    async fn lpush(&self, store: &str, key: &str, value: String) -> crate::error::Result<usize> {
        self.gate().await?;
        self.inner.lpush(store, key, value).await
    }

    async fn lpop(&self, store: &str, key: &str) -> crate::error::Result<String> {
        self.gate().await?;
        self.inner.lpop(store, key).await
    }

    async fn sadd(&self, store: &str, key: &str, value: String) -> crate::error::Result<bool> {
        self.gate().await?;
        self.inner.sadd(store, key, value).await
    }

    async fn spop(&self, store: &str, key: &str) -> crate::error::Result<String> {
        self.gate().await?;
        self.inner.spop(store, key).await
    }

    async fn create_store(&self, store: &str) -> crate::error::Result<()> {
        self.gate().await?;
        self.inner.create_store(store).await
    }

    async fn delete_store(&self, store: &str) -> crate::error::Result<bool> {
        self.gate().await?;
        self.inner.delete_store(store).await
    }

    async fn list_stores(&self) -> crate::error::Result<Vec<String>> {
        self.gate().await?;
        self.inner.list_stores().await
    }

    async fn export(&self) -> crate::error::Result<ExportedStores> {
        self.gate().await?;
        self.inner.export().await
    }
}

fn selector_with(remote: &Arc<FlakyBackend>) -> BackendSelector {
    let config = HealthCheckConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(50),
    };
    BackendSelector::new(
        MemoryBackend::new(),
        Some(Arc::clone(remote) as Arc<dyn KvBackend>),
        config,
    )
}

fn scenario() -> Vec<Command> {
    let s = || "s".to_string();
    vec![
        Command::Set {
            store: s(),
            key: "k1".into(),
            value: "v1".into(),
            ttl: None,
        },
        Command::Get {
            store: s(),
            key: "k1".into(),
        },
        Command::LPush {
            store: s(),
            key: "l1".into(),
            value: "a".into(),
        },
        Command::LPush {
            store: s(),
            key: "l1".into(),
            value: "b".into(),
        },
        Command::LPop {
            store: s(),
            key: "l1".into(),
        },
        Command::LPop {
            store: s(),
            key: "l1".into(),
        },
        Command::LPop {
            store: s(),
            key: "l1".into(),
        },
        Command::SAdd {
            store: s(),
            key: "set1".into(),
            value: "x".into(),
        },
        Command::SAdd {
            store: s(),
            key: "set1".into(),
            value: "x".into(),
        },
        Command::SPop {
            store: s(),
            key: "set1".into(),
        },
        Command::SPop {
            store: s(),
            key: "set1".into(),
        },
        Command::Keys {
            store: s(),
            prefix: None,
        },
    ]
}

/// Outcome reduced to something comparable across backends.
fn outcome(result: crate::error::Result<Reply>) -> Result<Reply, &'static str> {
    result.map_err(|e| e.kind())
}

async fn run_scenario(selector: &BackendSelector) -> Vec<Result<Reply, &'static str>> {
    let mut outcomes = Vec::new();
    for command in scenario() {
        outcomes.push(outcome(selector.dispatch(&command).await));
    }
    outcomes
}

#[tokio::test]
async fn test_scenario_results() {
    let selector = BackendSelector::memory_only(MemoryBackend::new());
    let outcomes = run_scenario(&selector).await;

    assert_eq!(outcomes[0], Ok(Reply::Done));
    assert_eq!(outcomes[1], Ok(Reply::Value("v1".into())));
    assert_eq!(outcomes[2], Ok(Reply::Length(1)));
    assert_eq!(outcomes[3], Ok(Reply::Length(2)));
    assert_eq!(outcomes[4], Ok(Reply::Value("b".into())));
    assert_eq!(outcomes[5], Ok(Reply::Value("a".into())));
    assert_eq!(outcomes[6], Err("not_found"));
    assert_eq!(outcomes[7], Ok(Reply::Flag(true)));
    assert_eq!(outcomes[8], Ok(Reply::Flag(false)));
    assert_eq!(outcomes[9], Ok(Reply::Value("x".into())));
    assert_eq!(outcomes[10], Err("not_found"));
    assert_eq!(outcomes[11], Ok(Reply::Keys(vec!["k1".into()])));
}

#[tokio::test]
async fn test_fallback_is_transparent() {
    let healthy_remote = FlakyBackend::new(UP);
    let healthy = selector_with(&healthy_remote);
    assert_eq!(healthy.probe().await, BackendState::Healthy);
    let with_remote = run_scenario(&healthy).await;
    assert_eq!(healthy.backend_name(), "remote");

    let broken_remote = FlakyBackend::new(UP);
    let broken = selector_with(&broken_remote);
    assert_eq!(broken.probe().await, BackendState::Healthy);
    broken_remote.set_mode(DOWN);
    let with_fallback = run_scenario(&broken).await;

    assert_eq!(with_remote, with_fallback);
    assert_eq!(broken.state(), BackendState::Degraded);
    assert_eq!(broken.backend_name(), "memory");
}

#[tokio::test]
async fn test_degraded_routes_directly_to_local() {
    let remote = FlakyBackend::new(DOWN);
    let selector = selector_with(&remote);

    assert_eq!(selector.probe().await, BackendState::Degraded);
    let calls_after_probe = remote.calls();

    let set = Command::Set {
        store: "s".into(),
        key: "k".into(),
        value: "v".into(),
        ttl: None,
    };
    selector.dispatch(&set).await.unwrap();

    assert_eq!(remote.calls(), calls_after_probe);
    assert_eq!(selector.local().get("s", "k").await.unwrap(), "v");
}

#[tokio::test]
async fn test_probe_recovers_without_reconciling() {
    let remote = FlakyBackend::new(DOWN);
    let selector = selector_with(&remote);
    selector.probe().await;

    let set = Command::Set {
        store: "s".into(),
        key: "written-while-degraded".into(),
        value: "v".into(),
        ttl: None,
    };
    selector.dispatch(&set).await.unwrap();

    remote.set_mode(UP);
    assert_eq!(selector.probe().await, BackendState::Healthy);
    assert_eq!(selector.backend_name(), "remote");

    // Local writes are not copied to the recovered remote backend.
    let get = Command::Get {
        store: "s".into(),
        key: "written-while-degraded".into(),
    };
    assert!(matches!(
        selector.dispatch(&get).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_timeout_triggers_fallback() {
    let remote = FlakyBackend::new(UP);
    let selector = selector_with(&remote);
    selector.probe().await;
    remote.set_mode(HANG);

    let push = Command::LPush {
        store: "s".into(),
        key: "l".into(),
        value: "a".into(),
    };
    let reply = tokio::time::timeout(Duration::from_secs(2), selector.dispatch(&push))
        .await
        .expect("dispatch must not wait on a hanging remote")
        .unwrap();

    assert_eq!(reply, Reply::Length(1));
    assert_eq!(selector.state(), BackendState::Degraded);
}

#[tokio::test]
async fn test_caller_errors_do_not_fall_back() {
    let remote = FlakyBackend::new(UP);
    let selector = selector_with(&remote);
    selector.probe().await;

    let push = Command::LPush {
        store: "s".into(),
        key: "k".into(),
        value: "v".into(),
    };
    selector.dispatch(&push).await.unwrap();

    let get = Command::Get {
        store: "s".into(),
        key: "k".into(),
    };
    assert!(matches!(
        selector.dispatch(&get).await,
        Err(Error::TypeMismatch { .. })
    ));
    assert_eq!(selector.state(), BackendState::Healthy);
    assert!(selector.local().registry().is_empty());
}

#[tokio::test]
async fn test_memory_only_mode() {
    let selector = BackendSelector::memory_only(MemoryBackend::new());
    assert!(!selector.has_remote());
    assert_eq!(selector.probe().await, BackendState::Degraded);
    assert_eq!(selector.backend_name(), "memory");
}

#[tokio::test]
async fn test_probe_loop_recovers_remote() {
    let remote = FlakyBackend::new(DOWN);
    let selector = Arc::new(selector_with(&remote));
    selector.probe().await;

    let handle = selector.spawn_probe_loop().unwrap();
    remote.set_mode(UP);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(selector.state(), BackendState::Healthy);
}

#[tokio::test]
async fn test_snapshot_of_hung_remote_times_out() {
    use crate::services::objects::MemoryObjectStore;
    use crate::services::snapshot::{SnapshotPhase, Snapshotter};

    let remote = FlakyBackend::new(HANG);
    let bucket = Arc::new(MemoryObjectStore::new());
    let snapshotter = Snapshotter::new(bucket.clone(), "snap.json", 1)
        .with_export_timeout(Duration::from_millis(50));

    let ticket = snapshotter.observe_mutation().expect("threshold of one");
    let err = snapshotter
        .run(ticket, remote.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SnapshotFailure { .. }));
    assert!(err.to_string().contains("timed out"), "unexpected error: {err}");

    // The flight ended and the count is kept for the next attempt.
    assert_eq!(snapshotter.counter().phase(), SnapshotPhase::Accumulating);
    assert_eq!(snapshotter.counter().count(), 1);
    assert!(bucket.is_empty());
}
