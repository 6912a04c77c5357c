//! Main Orchestrator - The "Brain"
//!
//! Coordinates all provisioning operations:
//! - Backend registration and discovery
//! - Storage class matching and pool selection
//! - Transaction-logged volume and snapshot lifecycles
//! - Bootstrap recovery of unfinished operations
//!
//! Volume, snapshot and bootstrap operations live in sibling modules as
//! further `impl Orchestrator` blocks.

use crate::controlplane::backends::BackendFactory;
use crate::controlplane::catalog::{BackendHandle, Catalog};
use crate::controlplane::events::EngineEvent;
use crate::controlplane::guard::{self, InFlight, OperationGuard};
use crate::controlplane::metrics::EngineMetrics;
use crate::domain::ports::{DriverOperation, StorageDriverRef, StoreClientRef};
use crate::error::{Error, Result};
use crate::persistence::{PersistentStore, TransactionLog, VolumeTransaction};
use crate::storage::{
    validate_name, Backend, BackendConfig, BackendState, Node, Volume, VolumeConfig,
};
use crate::storage_class::{matcher, MatchRequest, PoolCandidate, StorageClassConfig};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use prometheus::Registry;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Seed for pool selection; random when unset
    pub selection_seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            selection_seed: None,
        }
    }
}

// =============================================================================
// Status Types
// =============================================================================

/// Orchestrator status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub ready: bool,
    pub backend_count: usize,
    pub online_backends: usize,
    pub storage_class_count: usize,
    pub volume_count: usize,
    pub snapshot_count: usize,
    pub node_count: usize,
    pub in_flight_operations: usize,
    pub pending_transactions: i64,
    pub backends_health: BTreeMap<String, bool>,
}

/// Outcome of removing a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRemoval {
    /// The backend is gone
    Removed,
    /// Volumes remain; the backend is reaped when the last one is deleted
    MarkedDeleting,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Provisioning engine that owns the catalog and drives backends
pub struct Orchestrator {
    config: OrchestratorConfig,
    pub(super) catalog: Catalog,
    pub(super) store: Arc<PersistentStore>,
    pub(super) transactions: TransactionLog,
    pub(super) factory: BackendFactory,
    pub(super) in_flight: OperationGuard,
    pub(super) ready: AtomicBool,
    rng: Mutex<Box<dyn RngCore + Send>>,
    events: broadcast::Sender<EngineEvent>,
    pub(super) metrics: EngineMetrics,
}

impl Orchestrator {
    /// Create a new orchestrator over a store client
    pub fn new(
        config: OrchestratorConfig,
        store: StoreClientRef,
        factory: BackendFactory,
    ) -> Result<Arc<Self>> {
        let rng: Box<dyn RngCore + Send> = match config.selection_seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        Self::with_rng(config, store, factory, rng)
    }

    /// Create a new orchestrator with an explicit pool-selection source
    pub fn with_rng(
        config: OrchestratorConfig,
        store: StoreClientRef,
        factory: BackendFactory,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let store = Arc::new(PersistentStore::new(store));

        info!(
            "Creating orchestrator (store: {}, drivers: {:?})",
            store.client_name(),
            factory.kinds()
        );

        Ok(Arc::new(Self {
            config,
            catalog: Catalog::new(),
            transactions: TransactionLog::new(store.clone()),
            store,
            factory,
            in_flight: OperationGuard::new(),
            ready: AtomicBool::new(false),
            rng: Mutex::new(rng),
            events,
            metrics: EngineMetrics::new()?,
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Whether bootstrap has completed and mutations are accepted
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Registry holding this orchestrator's metrics
    pub fn metrics_registry(&self) -> Registry {
        self.metrics.registry().clone()
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    pub(super) fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    pub(super) fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(super) fn acquire(&self, key: String) -> Result<InFlight<'_>> {
        let claim = self.in_flight.try_acquire(key)?;
        self.metrics.set_in_flight(self.in_flight.len());
        Ok(claim)
    }

    /// Record the outcome of a public operation
    pub(super) fn finish<T>(&self, op: &str, name: &str, result: &Result<T>) {
        self.metrics.record_operation(op, result);
        self.metrics.set_in_flight(self.in_flight.len());

        match result {
            Ok(_) => {}
            Err(e @ (Error::InProgress { .. } | Error::NotReady)) => {
                debug!("{} {} rejected: {}", op, name, e)
            }
            Err(e) => error!("{} {} failed: {}", op, name, e),
        }
    }

    /// Run a backend call with no catalog lock held, timing it and
    /// failing the backend if it reports itself unreachable
    pub(super) async fn call_backend<T, F>(
        &self,
        handle: &BackendHandle,
        op: DriverOperation,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        self.metrics.observe_backend_call(op.as_str(), started.elapsed());

        if let Err(Error::BackendUnavailable { reason, .. }) = &result {
            self.mark_backend_failed(handle.backend.uuid, reason.clone()).await;
        }
        result
    }

    pub(super) async fn mark_backend_failed(&self, uuid: Uuid, reason: String) {
        // Deleting backends stay deleting so they can still be reaped
        match self.catalog.backend(uuid) {
            Some(handle) if handle.backend.state != BackendState::Deleting => {}
            _ => return,
        }
        let Some((previous, backend)) =
            self.catalog
                .set_backend_state(uuid, BackendState::Failed, Some(reason.clone()))
        else {
            return;
        };

        warn!(
            "Backend {} marked failed (was {}): {}",
            backend.name, previous, reason
        );
        if let Err(e) = self.store.update_backend(&backend.to_record()).await {
            warn!("Failed to persist state of backend {}: {}", backend.name, e);
        }

        self.emit(EngineEvent::BackendStateChanged {
            name: backend.name,
            from: previous,
            to: BackendState::Failed,
            reason: Some(reason),
        });
    }

    pub(super) async fn begin(&self, txn: &VolumeTransaction) -> Result<()> {
        self.transactions.begin(txn).await?;
        self.metrics.transaction_begun();
        Ok(())
    }

    /// Commit a transaction; a failure leaves it for bootstrap to resolve
    pub(super) async fn commit(&self, txn: &VolumeTransaction) {
        match self.transactions.commit(txn).await {
            Ok(()) => self.metrics.transaction_finished(),
            Err(e) => warn!(
                "Failed to commit {} transaction for {}, leaving it for recovery: {}",
                txn.op,
                txn.key(),
                e
            ),
        }
    }

    pub(super) fn backend_for(&self, volume: &Volume) -> Result<BackendHandle> {
        self.catalog
            .backend(volume.backend_uuid)
            .ok_or_else(|| Error::not_found("Backend", volume.backend_uuid.to_string()))
    }

    /// Pick a pool for a new volume
    pub(super) fn select_pool(
        &self,
        class: &StorageClassConfig,
        config: &VolumeConfig,
    ) -> Result<PoolCandidate> {
        let backends = self.catalog.backends();
        let request = MatchRequest::from(config);
        let mut rng = self.rng.lock();
        let choice = matcher::pick(class, &request, &backends, &mut **rng)?;

        debug!(
            "Selected pool {}:{} for volume {} (class {})",
            choice.backend_name, choice.pool, config.name, class.name
        );
        Ok(choice)
    }

    /// Remove a deleting backend once it has no volumes left
    pub(super) async fn reap_backend_if_deleting(&self, uuid: Uuid) {
        let Some(handle) = self.catalog.backend(uuid) else {
            return;
        };
        if handle.backend.state != BackendState::Deleting
            || self.catalog.backend_volume_count(uuid) > 0
        {
            return;
        }

        if let Err(e) = self.store.delete_backend(&handle.backend.name).await {
            warn!(
                "Failed to remove deleting backend {}: {}",
                handle.backend.name, e
            );
            return;
        }
        self.catalog.remove_backend(uuid);
        info!("Reaped backend {} after its last volume", handle.backend.name);
        self.emit(EngineEvent::BackendRemoved {
            name: handle.backend.name,
        });
    }

    /// Run driver discovery, updating pools and state
    pub(super) async fn discover(&self, backend: &mut Backend, driver: &StorageDriverRef) {
        let started = Instant::now();
        let result = driver.initialize(&backend.config).await;
        self.metrics
            .observe_backend_call(DriverOperation::Initialize.as_str(), started.elapsed());

        match result {
            Ok(pools) => {
                backend.set_pools(pools);
                if backend.state == BackendState::Failed {
                    backend.state = BackendState::Online;
                    backend.state_reason = None;
                }
                debug!(
                    "Discovered {} pool(s) on backend {}",
                    backend.pools.len(),
                    backend.name
                );
            }
            Err(e) => {
                warn!("Backend {} failed discovery: {}", backend.name, e);
                backend.pools.clear();
                if backend.state != BackendState::Deleting {
                    backend.state = BackendState::Failed;
                }
                backend.state_reason = Some(e.to_string());
            }
        }
    }

    // =========================================================================
    // Backends
    // =========================================================================

    /// Register a backend and discover its pools.
    ///
    /// A backend whose discovery fails is still registered, in the Failed
    /// state, so its configuration can be corrected with `update_backend`.
    pub async fn add_backend(&self, config: BackendConfig) -> Result<Backend> {
        let name = config.name.clone();
        let result = self.add_backend_inner(config).await;
        self.finish("add_backend", &name, &result);
        result
    }

    async fn add_backend_inner(&self, config: BackendConfig) -> Result<Backend> {
        self.ensure_ready()?;
        validate_name("backend", &config.name)?;
        let _claim = self.acquire(guard::backend_key(&config.name))?;

        if self.catalog.backend_by_name(&config.name).is_some() {
            return Err(Error::already_exists("Backend", &config.name));
        }

        info!("Adding backend: {} (driver {})", config.name, config.driver);
        let driver = self.factory.create(&config)?;

        let mut backend = Backend {
            uuid: Uuid::new_v4(),
            name: config.name.clone(),
            driver_kind: driver.kind().to_string(),
            protocol: driver.protocol(),
            state: BackendState::Online,
            state_reason: None,
            pools: BTreeMap::new(),
            config,
            registered_at: Utc::now(),
        };
        self.discover(&mut backend, &driver).await;

        self.store.add_backend(&backend.to_record()).await?;
        self.catalog.add_backend(BackendHandle {
            backend: backend.clone(),
            driver,
        })?;

        info!(
            "Backend {} added ({}, {} pools)",
            backend.name,
            backend.state,
            backend.pools.len()
        );
        self.emit(EngineEvent::BackendAdded {
            name: backend.name.clone(),
            state: backend.state,
            pool_count: backend.pools.len(),
        });
        Ok(backend)
    }

    /// Replace a backend's configuration and rediscover its pools
    pub async fn update_backend(&self, config: BackendConfig) -> Result<Backend> {
        let name = config.name.clone();
        let result = self.update_backend_inner(config).await;
        self.finish("update_backend", &name, &result);
        result
    }

    async fn update_backend_inner(&self, config: BackendConfig) -> Result<Backend> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::backend_key(&config.name))?;

        let existing = self
            .catalog
            .backend_by_name(&config.name)
            .ok_or_else(|| Error::not_found("Backend", &config.name))?;

        info!("Updating backend: {}", config.name);
        let driver = self.factory.create(&config)?;

        let mut backend = existing.backend.clone();
        backend.driver_kind = driver.kind().to_string();
        backend.protocol = driver.protocol();
        backend.config = config;
        self.discover(&mut backend, &driver).await;

        for volume in self.catalog.volumes() {
            if volume.backend_uuid == backend.uuid && backend.pool(&volume.pool).is_none() {
                warn!(
                    "Volume {} is on pool {} which backend {} no longer reports",
                    volume.name(),
                    volume.pool,
                    backend.name
                );
            }
        }

        self.store.update_backend(&backend.to_record()).await?;
        self.catalog.replace_backend(BackendHandle {
            backend: backend.clone(),
            driver,
        });

        if existing.backend.state != backend.state {
            self.emit(EngineEvent::BackendStateChanged {
                name: backend.name.clone(),
                from: existing.backend.state,
                to: backend.state,
                reason: backend.state_reason.clone(),
            });
        }
        self.emit(EngineEvent::BackendUpdated {
            name: backend.name.clone(),
            state: backend.state,
            pool_count: backend.pools.len(),
        });
        Ok(backend)
    }

    /// Take an online backend out of placement, or put it back
    pub async fn set_backend_online(&self, name: &str, online: bool) -> Result<Backend> {
        let result = self.set_backend_online_inner(name, online).await;
        self.finish("set_backend_online", name, &result);
        result
    }

    async fn set_backend_online_inner(&self, name: &str, online: bool) -> Result<Backend> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::backend_key(name))?;

        let handle = self
            .catalog
            .backend_by_name(name)
            .ok_or_else(|| Error::not_found("Backend", name))?;

        let target = if online {
            BackendState::Online
        } else {
            BackendState::Offline
        };
        let from = handle.backend.state;
        match from {
            BackendState::Online | BackendState::Offline => {}
            BackendState::Failed | BackendState::Deleting => {
                return Err(Error::InvalidArgument(format!(
                    "backend {} is {}; only online and offline backends can be toggled",
                    name, from
                )))
            }
        }
        if from == target {
            return Ok(handle.backend);
        }

        let mut backend = handle.backend.clone();
        backend.state = target;
        backend.state_reason = None;
        self.store.update_backend(&backend.to_record()).await?;
        self.catalog.set_backend_state(backend.uuid, target, None);

        info!("Backend {} is now {}", name, target);
        self.emit(EngineEvent::BackendStateChanged {
            name: name.to_string(),
            from,
            to: target,
            reason: None,
        });
        Ok(backend)
    }

    /// Remove a backend; one that still has volumes is marked Deleting
    pub async fn remove_backend(&self, name: &str) -> Result<BackendRemoval> {
        let result = self.remove_backend_inner(name).await;
        self.finish("remove_backend", name, &result);
        result
    }

    async fn remove_backend_inner(&self, name: &str) -> Result<BackendRemoval> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::backend_key(name))?;

        let Some(handle) = self.catalog.backend_by_name(name) else {
            debug!("Backend {} already absent", name);
            return Ok(BackendRemoval::Removed);
        };

        let uuid = handle.backend.uuid;
        let reason = handle.backend.state_reason.clone();
        let Some((from, volume_count)) = self.catalog.begin_backend_removal(uuid) else {
            debug!("Backend {} already absent", name);
            return Ok(BackendRemoval::Removed);
        };

        if volume_count > 0 {
            let mut backend = handle.backend.clone();
            backend.state = BackendState::Deleting;
            if let Err(e) = self.store.update_backend(&backend.to_record()).await {
                self.catalog.set_backend_state(uuid, from, reason);
                return Err(e);
            }

            info!(
                "Backend {} has {} volume(s); marked deleting",
                name, volume_count
            );
            self.emit(EngineEvent::BackendStateChanged {
                name: name.to_string(),
                from,
                to: BackendState::Deleting,
                reason: None,
            });
            return Ok(BackendRemoval::MarkedDeleting);
        }

        if let Err(e) = self.store.delete_backend(name).await {
            self.catalog.set_backend_state(uuid, from, reason);
            return Err(e);
        }
        self.catalog.remove_backend(uuid);
        info!("Removed backend {}", name);
        self.emit(EngineEvent::BackendRemoved {
            name: name.to_string(),
        });
        Ok(BackendRemoval::Removed)
    }

    pub fn get_backend(&self, name: &str) -> Result<Backend> {
        self.catalog
            .backend_by_name(name)
            .map(|h| h.backend)
            .ok_or_else(|| Error::not_found("Backend", name))
    }

    pub fn list_backends(&self) -> Vec<Backend> {
        self.catalog.backends()
    }

    // =========================================================================
    // Storage Classes
    // =========================================================================

    pub async fn add_storage_class(
        &self,
        config: StorageClassConfig,
    ) -> Result<StorageClassConfig> {
        let name = config.name.clone();
        let result = self.add_storage_class_inner(config).await;
        self.finish("add_storage_class", &name, &result);
        result
    }

    async fn add_storage_class_inner(
        &self,
        config: StorageClassConfig,
    ) -> Result<StorageClassConfig> {
        self.ensure_ready()?;
        config.validate()?;

        if self.catalog.storage_class(&config.name).is_some() {
            return Err(Error::already_exists("StorageClass", &config.name));
        }

        self.store.add_storage_class(&config).await?;
        self.catalog.add_storage_class(config.clone())?;

        let pools =
            matcher::candidates(&config, &MatchRequest::default(), &self.catalog.backends());
        info!(
            "Storage class {} added ({} matching pool(s))",
            config.name,
            pools.len()
        );
        self.emit(EngineEvent::StorageClassAdded {
            name: config.name.clone(),
        });
        Ok(config)
    }

    pub fn get_storage_class(&self, name: &str) -> Result<StorageClassConfig> {
        self.catalog
            .storage_class(name)
            .ok_or_else(|| Error::not_found("StorageClass", name))
    }

    pub fn list_storage_classes(&self) -> Vec<StorageClassConfig> {
        self.catalog.storage_classes()
    }

    /// Pools a storage class currently admits, ignoring protocol
    pub fn storage_class_pools(&self, name: &str) -> Result<Vec<PoolCandidate>> {
        let class = self.get_storage_class(name)?;
        Ok(matcher::candidates(
            &class,
            &MatchRequest::default(),
            &self.catalog.backends(),
        ))
    }

    /// Delete a storage class; deleting an absent class succeeds
    pub async fn delete_storage_class(&self, name: &str) -> Result<()> {
        let result = self.delete_storage_class_inner(name).await;
        self.finish("delete_storage_class", name, &result);
        result
    }

    async fn delete_storage_class_inner(&self, name: &str) -> Result<()> {
        self.ensure_ready()?;

        self.store.delete_storage_class(name).await?;
        if self.catalog.remove_storage_class(name).is_some() {
            info!("Deleted storage class {}", name);
            self.emit(EngineEvent::StorageClassDeleted {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub async fn add_or_update_node(&self, node: Node) -> Result<Node> {
        let name = node.name.clone();
        let result = self.add_or_update_node_inner(node).await;
        self.finish("add_or_update_node", &name, &result);
        result
    }

    async fn add_or_update_node_inner(&self, node: Node) -> Result<Node> {
        self.ensure_ready()?;
        validate_name("node", &node.name)?;

        self.store.add_or_update_node(&node).await?;
        self.catalog.put_node(node.clone());
        debug!("Node {} registered ({} IPs)", node.name, node.ips.len());
        Ok(node)
    }

    pub fn get_node(&self, name: &str) -> Result<Node> {
        self.catalog
            .node(name)
            .ok_or_else(|| Error::not_found("Node", name))
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.catalog.nodes()
    }

    /// Delete a node; deleting an absent node succeeds
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let result = self.delete_node_inner(name).await;
        self.finish("delete_node", name, &result);
        result
    }

    async fn delete_node_inner(&self, name: &str) -> Result<()> {
        self.ensure_ready()?;
        self.store.delete_node(name).await?;
        self.catalog.remove_node(name);
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Get orchestrator status, probing each backend's health
    pub async fn status(&self) -> OrchestratorStatus {
        let counts = self.catalog.counts();

        let checks = self.catalog.backend_handles().into_iter().map(|handle| async move {
            let healthy = handle.driver.health_check().await.unwrap_or(false);
            (handle.backend.name, healthy)
        });
        let backends_health: BTreeMap<String, bool> = join_all(checks).await.into_iter().collect();

        OrchestratorStatus {
            ready: self.is_ready(),
            backend_count: counts.backends,
            online_backends: counts.online_backends,
            storage_class_count: counts.storage_classes,
            volume_count: counts.volumes,
            snapshot_count: counts.snapshots,
            node_count: counts.nodes,
            in_flight_operations: self.in_flight.len(),
            pending_transactions: self.metrics.pending_transactions(),
            backends_health,
        }
    }
}
