//! Shared fixtures for orchestrator tests

use crate::controlplane::backends::{BackendFactory, MemoryDriver, MemoryDriverConfig};
use crate::controlplane::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::domain::ports::{StorageDriverRef, StoreClient, StoreClientRef, StoreResult};
use crate::error::StoreError;
use crate::persistence::InMemoryStore;
use crate::storage::BackendConfig;
use crate::storage_class::StorageClassConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) fn shared_driver(config: MemoryDriverConfig) -> Arc<MemoryDriver> {
    Arc::new(MemoryDriver::new("mem-1", config))
}

/// Factory whose memory kind always hands out `driver`
pub(crate) fn factory_for(driver: Arc<MemoryDriver>) -> BackendFactory {
    BackendFactory::empty().with_driver("memory", move |_| Ok(driver.clone() as StorageDriverRef))
}

/// A bootstrapped orchestrator with backend `mem-1` and an open class `gold`
pub(crate) async fn orchestrator_with(
    config: MemoryDriverConfig,
) -> (Arc<Orchestrator>, Arc<MemoryDriver>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let driver = shared_driver(config);
    let orch = orchestrator_over(store.clone(), driver.clone()).await;
    (orch, driver, store)
}

/// Like [`orchestrator_with`], over any store client
pub(crate) async fn orchestrator_over(
    store: StoreClientRef,
    driver: Arc<MemoryDriver>,
) -> Arc<Orchestrator> {
    let orch = Orchestrator::new(
        OrchestratorConfig {
            selection_seed: Some(7),
            ..Default::default()
        },
        store,
        factory_for(driver),
    )
    .unwrap();

    orch.bootstrap().await.unwrap();
    orch.add_backend(BackendConfig::new("mem-1", "memory"))
        .await
        .unwrap();
    orch.add_storage_class(StorageClassConfig::new("gold"))
        .await
        .unwrap();
    orch
}

/// Simulate a process restart over the same store and backend
pub(crate) async fn restart(
    store: Arc<InMemoryStore>,
    driver: Arc<MemoryDriver>,
) -> Arc<Orchestrator> {
    let orch =
        Orchestrator::new(OrchestratorConfig::default(), store, factory_for(driver)).unwrap();
    orch.bootstrap().await.unwrap();
    orch
}

/// Store whose writes and deletes under a key prefix wait until released
pub(crate) struct GatedStore {
    inner: Arc<InMemoryStore>,
    prefix: String,
    gate: Semaphore,
    waiting: AtomicUsize,
}

impl GatedStore {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            inner: Arc::new(InMemoryStore::new()),
            prefix: prefix.to_string(),
            gate: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// The underlying store, bypassing the gate
    pub(crate) fn inner(&self) -> Arc<InMemoryStore> {
        self.inner.clone()
    }

    /// Let every held and future write through
    pub(crate) fn release(&self) {
        self.gate.add_permits(1 << 20);
    }

    /// Wait until `count` writes are held at the gate
    pub(crate) async fn held(&self, count: usize) {
        while self.waiting.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn pass(&self, key: &str) -> StoreResult<()> {
        if key.starts_with(&self.prefix) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            permit.forget();
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for GatedStore {
    async fn create(&self, key: &str, value: &str) -> StoreResult<()> {
        self.pass(key).await?;
        self.inner.create(key, value).await
    }

    async fn read(&self, key: &str) -> StoreResult<String> {
        self.inner.read(key).await
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        self.pass(key).await?;
        self.inner.update(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.pass(key).await?;
        self.inner.delete(key).await
    }

    async fn read_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.read_keys(prefix).await
    }

    async fn delete_keys(&self, prefix: &str) -> StoreResult<()> {
        self.inner.delete_keys(prefix).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}
