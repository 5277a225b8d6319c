//! End-to-end tests of the service core: fallback, snapshots to a real
//! bucket directory, restore.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlakyRemote, flaky_selector};
use rdict::config::Config;
use rdict::context::AppContext;
use rdict::error::Error;
use rdict::reliability::RetryConfig;
use rdict::services::cache::SearchCache;
use rdict::services::kv::{BackendState, KvBackend};
use rdict::services::objects::FilesystemObjectStore;
use rdict::services::search::{SearchQuery, SearchSource};
use rdict::services::snapshot::Snapshotter;
use tempfile::TempDir;

fn cache() -> SearchCache<rdict::services::search::SearchResult> {
    SearchCache::new(16, Duration::from_secs(60))
}

#[tokio::test]
async fn test_fallback_is_transparent_to_callers() {
    let remote = FlakyRemote::new();
    let selector = flaky_selector(&remote);
    assert_eq!(selector.probe().await, BackendState::Healthy);
    let ctx = AppContext::new(Arc::clone(&selector), cache(), None);

    ctx.set("s", "k1", "v1".into(), None).await.unwrap();
    assert_eq!(remote.data().get("s", "k1").await.unwrap(), "v1");
    assert_eq!(ctx.health().await.backend, "remote");

    remote.set_down(true);
    // Same calls, same result shapes, served locally.
    ctx.set("s", "k1", "local".into(), None).await.unwrap();
    assert_eq!(ctx.get("s", "k1").await.unwrap(), "local");
    assert_eq!(ctx.lpush("s", "l1", "a".into()).await.unwrap(), 1);
    assert!(ctx.sadd("s", "set1", "x".into()).await.unwrap());

    let health = ctx.health().await;
    assert_eq!(health.backend, "memory");
    assert_eq!(health.state, BackendState::Degraded);

    // Caller errors pass through unchanged while degraded.
    assert!(matches!(
        ctx.get("s", "l1").await,
        Err(Error::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_recovery_does_not_reconcile() {
    let remote = FlakyRemote::new();
    let selector = flaky_selector(&remote);
    selector.probe().await;
    let ctx = AppContext::new(Arc::clone(&selector), cache(), None);

    remote.set_down(true);
    ctx.set("s", "only-local", "v".into(), None).await.unwrap();

    remote.set_down(false);
    let task = selector.spawn_probe_loop().expect("remote configured");
    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if selector.state() == BackendState::Healthy {
            recovered = true;
            break;
        }
    }
    task.abort();
    assert!(recovered, "probe loop should flip back to healthy");

    // The locally written key stays on the local engine.
    assert!(matches!(
        ctx.get("s", "only-local").await,
        Err(Error::NotFound { .. })
    ));
    assert_eq!(
        selector.local().get("s", "only-local").await.unwrap(),
        "v"
    );
}

#[tokio::test]
async fn test_snapshot_and_restore_through_filesystem_bucket() {
    let dir = TempDir::new().unwrap();
    let bucket = Arc::new(FilesystemObjectStore::open(dir.path()).unwrap());

    let writer = AppContext::new(
        Arc::new(rdict::services::kv::BackendSelector::memory_only(
            Default::default(),
        )),
        cache(),
        Some(Arc::new(Snapshotter::new(bucket.clone(), "rdict/snapshot.json", 4))),
    );
    writer.set("users", "alice", "admin".into(), None).await.unwrap();
    writer
        .set("users", "temp", "x".into(), Some(Duration::from_millis(300)))
        .await
        .unwrap();
    writer.lpush("jobs", "queue", "j1".into()).await.unwrap();
    writer.sadd("jobs", "seen", "j0".into()).await.unwrap();

    // Fourth mutation committed the snapshot file.
    let path = dir.path().join("rdict").join("snapshot.json");
    assert!(path.is_file());
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["format_version"], 1);
    assert_eq!(raw["stores"]["jobs"]["queue"]["kind"], "list");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let reader = AppContext::new(
        Arc::new(rdict::services::kv::BackendSelector::memory_only(
            Default::default(),
        )),
        cache(),
        Some(Arc::new(Snapshotter::new(bucket, "rdict/snapshot.json", 4))),
    );
    let summary = reader
        .restore_with_retry(RetryConfig::default().with_max_retries(1))
        .await
        .unwrap()
        .expect("snapshot exists");
    assert_eq!(summary.stores, 2);
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.dropped_expired, 1);

    assert_eq!(reader.get("users", "alice").await.unwrap(), "admin");
    assert_eq!(reader.lpop("jobs", "queue").await.unwrap(), "j1");
    assert_eq!(reader.spop("jobs", "seen").await.unwrap(), "j0");
    assert!(matches!(
        reader.get("users", "temp").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_restore_rejects_incompatible_snapshot() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("rdict")).unwrap();
    std::fs::write(
        dir.path().join("rdict").join("snapshot.json"),
        br#"{"format_version": 42, "created_at": "2026-01-01T00:00:00Z", "stores": {}}"#,
    )
    .unwrap();

    let mut config = Config::default();
    config.snapshot.bucket = dir.path().to_path_buf();
    let ctx = AppContext::from_config(&config).await.unwrap();
    ctx.set("s", "k", "v".into(), None).await.unwrap();

    let err = ctx
        .restore_with_retry(RetryConfig::default().with_max_retries(3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleSnapshot { found: 42, .. }));
    // Nothing replaced.
    assert_eq!(ctx.get("s", "k").await.unwrap(), "v");
}

#[tokio::test]
async fn test_from_config_memory_only() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.snapshot.bucket = dir.path().join("snaps");
    config.snapshot.threshold = 1;
    config.snapshot.background = false;

    let ctx = AppContext::from_config(&config).await.unwrap();
    assert!(!ctx.selector().has_remote());
    assert_eq!(ctx.health().await.backend, "memory");

    ctx.set("s", "k", "v".into(), None).await.unwrap();
    assert!(dir.path().join("snaps").join("rdict").join("snapshot.json").is_file());
    assert!(ctx.restore().await.unwrap().is_some());
}

#[tokio::test]
async fn test_search_survives_fallback() {
    let remote = FlakyRemote::new();
    let selector = flaky_selector(&remote);
    selector.probe().await;
    let ctx = AppContext::new(Arc::clone(&selector), cache(), None);

    remote.set_down(true);
    ctx.set("docs", "readme", "Getting started".into(), None)
        .await
        .unwrap();

    let outcome = ctx
        .search(&SearchQuery::new("docs", "started"))
        .await
        .unwrap();
    assert_eq!(outcome.source, SearchSource::Store);
    assert_eq!(outcome.result.hits.len(), 1);
}
