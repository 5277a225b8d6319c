//! Shared helpers for integration tests.
//!
//! - [`TestHost`] drives the axum router in-process through `oneshot`
//! - [`FlakyRemote`] is a scripted remote backend that can be taken down

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use rdict::context::AppContext;
use rdict::error::{Error, Result};
use rdict::http::{AppState, SharedState, router};
use rdict::services::cache::SearchCache;
use rdict::services::kv::{
    BackendSelector, EntryValue, ExportedStores, HealthCheckConfig, KvBackend, MemoryBackend,
};
use rdict::services::objects::MemoryObjectStore;
use rdict::services::snapshot::Snapshotter;

/// In-process HTTP host.
pub struct TestHost {
    state: SharedState,
    pub bucket: Arc<MemoryObjectStore>,
}

pub struct TestHostBuilder {
    threshold: u64,
    cache_capacity: usize,
    cache_ttl: Duration,
}

impl TestHost {
    pub fn builder() -> TestHostBuilder {
        TestHostBuilder {
            threshold: 100,
            cache_capacity: 100,
            cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn ctx(&self) -> &Arc<AppContext> {
        &self.state.ctx
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = router(Arc::clone(&self.state))
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn put(
        &self,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        self.request(Method::PUT, uri, body).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(Method::DELETE, uri, None).await
    }
}

impl TestHostBuilder {
    pub fn snapshot_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    pub fn start(self) -> TestHost {
        let bucket = Arc::new(MemoryObjectStore::new());
        let snapshotter = Arc::new(Snapshotter::new(
            bucket.clone(),
            "rdict/snapshot.json",
            self.threshold,
        ));
        let ctx = AppContext::new(
            Arc::new(BackendSelector::memory_only(MemoryBackend::new())),
            SearchCache::new(self.cache_capacity, self.cache_ttl),
            Some(snapshotter),
        );
        TestHost {
            state: AppState::new(Arc::new(ctx), None),
            bucket,
        }
    }
}

/// Remote backend double: a memory backend that can be switched off.
///
/// While down, every call fails with a transport error, like an unreachable
/// server.
#[derive(Clone, Default)]
pub struct FlakyRemote {
    inner: MemoryBackend,
    down: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn data(&self) -> &MemoryBackend {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::remote("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FlakyRemote {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn set(
        &self,
        store: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check()?;
        self.inner.set(store, key, value, ttl).await
    }

    async fn get(&self, store: &str, key: &str) -> Result<String> {
        self.check()?;
        self.inner.get(store, key).await
    }

    async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(store, key).await
    }

    async fn update(&self, store: &str, key: &str, value: String) -> Result<String> {
        self.check()?;
        self.inner.update(store, key, value).await
    }

    async fn keys(&self, store: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(store, prefix).await
    }

    async fn items(&self, store: &str) -> Result<Vec<(String, EntryValue)>> {
        self.check()?;
        self.inner.items(store).await
    }

    async fn lpush(&self, store: &str, key: &str, value: String) -> Result<usize> {
        self.check()?;
        self.inner.lpush(store, key, value).await
    }

    async fn lpop(&self, store: &str, key: &str) -> Result<String> {
        self.check()?;
        self.inner.lpop(store, key).await
    }

    async fn sadd(&self, store: &str, key: &str, value: String) -> Result<bool> {
        self.check()?;
        self.inner.sadd(store, key, value).await
    }

    async fn spop(&self, store: &str, key: &str) -> Result<String> {
        self.check()?;
        self.inner.spop(store, key).await
    }

    async fn create_store(&self, store: &str) -> Result<()> {
        self.check()?;
        self.inner.create_store(store).await
    }

    async fn delete_store(&self, store: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete_store(store).await
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_stores().await
    }

    async fn export(&self) -> Result<ExportedStores> {
        self.check()?;
        self.inner.export().await
    }
}

/// Selector over a [`FlakyRemote`] with short probe settings.
pub fn flaky_selector(remote: &FlakyRemote) -> Arc<BackendSelector> {
    Arc::new(BackendSelector::new(
        MemoryBackend::new(),
        Some(Arc::new(remote.clone())),
        HealthCheckConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(100),
        },
    ))
}
