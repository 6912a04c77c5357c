//! In-Memory Reference Driver
//!
//! Tracks volumes and snapshots in process memory. Pools, protocol and
//! capabilities come from the backend's JSON config. Used by tests, the
//! matcher bench and the standalone daemon; it also carries fault-injection
//! hooks for exercising the engine's failure paths.

use crate::attribute::{AttributeValue, BACKEND_TYPE, CLONES, SNAPSHOTS};
use crate::domain::ports::{
    AccessInfo, Capabilities, Capability, CloneSource, DriverOperation, SnapshotInfo,
    StorageDriver, VolumeOptions,
};
use crate::error::{Error, Result};
use crate::storage::{BackendConfig, DiscoveredPool, Node, Protocol};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

/// Driver kind registered by [`super::BackendFactory::with_defaults`]
pub const MEMORY_DRIVER: &str = "memory";

// =============================================================================
// Configuration
// =============================================================================

/// A pool the memory driver advertises
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPoolConfig {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl MemoryPoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Configuration for the memory driver, read from `BackendConfig::config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryDriverConfig {
    pub protocol: Protocol,
    pub pools: Vec<MemoryPoolConfig>,
    /// Supported optional operations; all of them when unset
    pub capabilities: Option<Vec<Capability>>,
    /// Fail discovery as if the backend could not be reached
    pub unreachable: bool,
    /// Address handed out in NFS access info and default iSCSI portals
    pub server_ip: String,
    pub target_portals: Vec<String>,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::File,
            pools: vec![MemoryPoolConfig::new("pool-1")],
            capabilities: None,
            unreachable: false,
            server_ip: "127.0.0.1".to_string(),
            target_portals: Vec::new(),
        }
    }
}

impl MemoryDriverConfig {
    /// Parse from an opaque backend config; `null` yields the defaults
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Configuration(format!("invalid memory driver config: {}", e)))
    }
}

// =============================================================================
// Tracked State
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryVolume {
    pool: String,
    size_bytes: u64,
    lun: u32,
}

// =============================================================================
// Memory Driver
// =============================================================================

pub struct MemoryDriver {
    backend: String,
    config: MemoryDriverConfig,
    capabilities: Capabilities,
    volumes: RwLock<BTreeMap<String, MemoryVolume>>,
    snapshots: RwLock<BTreeMap<(String, String), SnapshotInfo>>,
    published: RwLock<BTreeMap<String, BTreeSet<String>>>,
    next_lun: AtomicU32,
    /// Every call fails as unreachable while set
    unavailable: AtomicBool,
    /// One-shot failures, consumed by the next call of each operation
    failures: parking_lot::Mutex<HashSet<DriverOperation>>,
    /// Creates and clones wait for a permit while a gate is installed
    create_gate: parking_lot::Mutex<Option<Arc<Semaphore>>>,
    calls: DashMap<DriverOperation, u64>,
}

impl MemoryDriver {
    pub fn new(backend: impl Into<String>, config: MemoryDriverConfig) -> Self {
        let capabilities = match &config.capabilities {
            Some(caps) => caps.iter().copied().collect(),
            None => Capabilities::all(),
        };

        Self {
            backend: backend.into(),
            config,
            capabilities,
            volumes: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(BTreeMap::new()),
            published: RwLock::new(BTreeMap::new()),
            next_lun: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            failures: parking_lot::Mutex::new(HashSet::new()),
            create_gate: parking_lot::Mutex::new(None),
            calls: DashMap::new(),
        }
    }

    /// Build a driver from a backend registration
    pub fn from_backend_config(config: &BackendConfig) -> Result<Self> {
        Ok(Self::new(
            config.name.clone(),
            MemoryDriverConfig::from_value(&config.config)?,
        ))
    }

    // =========================================================================
    // Fault Injection and Inspection
    // =========================================================================

    /// Make every call fail as unreachable (for testing)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fail the next call of `operation` (for testing)
    pub fn fail_next(&self, operation: DriverOperation) {
        self.failures.lock().insert(operation);
    }

    /// Hold creates and clones until the semaphore hands out a permit
    pub fn set_create_gate(&self, gate: Option<Arc<Semaphore>>) {
        *self.create_gate.lock() = gate;
    }

    pub fn call_count(&self, operation: DriverOperation) -> u64 {
        self.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    pub async fn has_volume(&self, name: &str) -> bool {
        self.volumes.read().await.contains_key(name)
    }

    pub async fn volume_size(&self, name: &str) -> Option<u64> {
        self.volumes.read().await.get(name).map(|v| v.size_bytes)
    }

    pub async fn volume_pool(&self, name: &str) -> Option<String> {
        self.volumes.read().await.get(name).map(|v| v.pool.clone())
    }

    pub async fn volume_count(&self) -> usize {
        self.volumes.read().await.len()
    }

    pub async fn has_snapshot(&self, volume: &str, snapshot: &str) -> bool {
        self.snapshots
            .read()
            .await
            .contains_key(&(volume.to_string(), snapshot.to_string()))
    }

    pub async fn published_nodes(&self, volume: &str) -> Vec<String> {
        self.published
            .read()
            .await
            .get(volume)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Count the call and apply injected faults
    fn enter(&self, operation: DriverOperation) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::BackendUnavailable {
                backend: self.backend.clone(),
                reason: "backend is unreachable".to_string(),
            });
        }

        if self.failures.lock().remove(&operation) {
            return Err(self.failed(operation, "injected failure"));
        }

        Ok(())
    }

    fn failed(&self, operation: DriverOperation, reason: impl Into<String>) -> Error {
        Error::BackendOperationFailed {
            backend: self.backend.clone(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    fn require(&self, capability: Capability, operation: DriverOperation) -> Result<()> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(Error::unsupported(
                operation.as_str(),
                format!("backend {} does not support {}", self.backend, capability),
            ))
        }
    }

    async fn wait_for_gate(&self) -> Result<()> {
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Internal(format!("create gate closed: {}", e)))?
                .forget();
        }
        Ok(())
    }

    fn discovered_pools(&self) -> Vec<DiscoveredPool> {
        self.config
            .pools
            .iter()
            .map(|pool| {
                let mut discovered = DiscoveredPool {
                    name: pool.name.clone(),
                    attributes: pool.attributes.clone(),
                    labels: pool.labels.clone(),
                };
                discovered
                    .attributes
                    .entry(BACKEND_TYPE.to_string())
                    .or_insert_with(|| AttributeValue::string(MEMORY_DRIVER));
                discovered
                    .attributes
                    .entry(SNAPSHOTS.to_string())
                    .or_insert(AttributeValue::Bool(
                        self.capabilities.contains(Capability::Snapshot),
                    ));
                discovered
                    .attributes
                    .entry(CLONES.to_string())
                    .or_insert(AttributeValue::Bool(self.capabilities.contains(Capability::Clone)));
                discovered
            })
            .collect()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn kind(&self) -> &str {
        MEMORY_DRIVER
    }

    fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn initialize(&self, config: &BackendConfig) -> Result<Vec<DiscoveredPool>> {
        self.enter(DriverOperation::Initialize)?;

        if self.config.unreachable {
            return Err(Error::BackendUnavailable {
                backend: config.name.clone(),
                reason: "could not connect to backend".to_string(),
            });
        }

        let pools = self.discovered_pools();
        info!(
            "Initialized memory backend {} with {} pool(s)",
            config.name,
            pools.len()
        );
        Ok(pools)
    }

    async fn create_volume(
        &self,
        name: &str,
        pool: &str,
        size_bytes: u64,
        options: &VolumeOptions,
    ) -> Result<()> {
        self.enter(DriverOperation::CreateVolume)?;
        self.wait_for_gate().await?;

        if !self.config.pools.iter().any(|p| p.name == pool) {
            return Err(self.failed(
                DriverOperation::CreateVolume,
                format!("pool {} not found", pool),
            ));
        }

        let mut volumes = self.volumes.write().await;
        if let Some(existing) = volumes.get(name) {
            if existing.pool == pool && existing.size_bytes >= size_bytes {
                debug!("Memory volume {} already exists", name);
                return Ok(());
            }
            return Err(self.failed(
                DriverOperation::CreateVolume,
                format!("volume {} already exists", name),
            ));
        }

        info!(
            "Creating memory volume: {} ({} bytes, pool {}, {})",
            name, size_bytes, pool, options.access_mode
        );
        volumes.insert(
            name.to_string(),
            MemoryVolume {
                pool: pool.to_string(),
                size_bytes,
                lun: self.next_lun.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(())
    }

    async fn clone_volume(
        &self,
        name: &str,
        source: &CloneSource,
        _options: &VolumeOptions,
    ) -> Result<()> {
        self.enter(DriverOperation::CloneVolume)?;
        self.require(Capability::Clone, DriverOperation::CloneVolume)?;
        self.wait_for_gate().await?;

        let mut volumes = self.volumes.write().await;
        let source_volume = volumes.get(source.volume()).cloned().ok_or_else(|| {
            self.failed(
                DriverOperation::CloneVolume,
                format!("source volume {} not found", source.volume()),
            )
        })?;

        let size_bytes = match source {
            CloneSource::Volume { .. } => source_volume.size_bytes,
            CloneSource::Snapshot { volume, snapshot } => self
                .snapshots
                .read()
                .await
                .get(&(volume.clone(), snapshot.clone()))
                .map(|s| s.size_bytes)
                .ok_or_else(|| {
                    self.failed(
                        DriverOperation::CloneVolume,
                        format!("source snapshot {}/{} not found", volume, snapshot),
                    )
                })?,
        };

        if volumes.contains_key(name) {
            debug!("Memory clone {} already exists", name);
            return Ok(());
        }

        info!("Cloning memory volume {} from {:?}", name, source);
        volumes.insert(
            name.to_string(),
            MemoryVolume {
                pool: source_volume.pool,
                size_bytes,
                lun: self.next_lun.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.enter(DriverOperation::DeleteVolume)?;

        if self.volumes.write().await.remove(name).is_some() {
            info!("Deleted memory volume: {}", name);
        } else {
            debug!("Memory volume {} already absent", name);
        }
        self.published.write().await.remove(name);
        Ok(())
    }

    async fn resize_volume(&self, name: &str, size_bytes: u64) -> Result<()> {
        self.enter(DriverOperation::ResizeVolume)?;
        self.require(Capability::Resize, DriverOperation::ResizeVolume)?;

        let mut volumes = self.volumes.write().await;
        let volume = volumes.get_mut(name).ok_or_else(|| {
            self.failed(
                DriverOperation::ResizeVolume,
                format!("volume {} not found", name),
            )
        })?;

        if size_bytes < volume.size_bytes {
            return Err(self.failed(
                DriverOperation::ResizeVolume,
                "volumes cannot shrink",
            ));
        }

        volume.size_bytes = size_bytes;
        info!("Resized memory volume {} to {} bytes", name, size_bytes);
        Ok(())
    }

    async fn create_snapshot(&self, volume: &str, snapshot: &str) -> Result<SnapshotInfo> {
        self.enter(DriverOperation::CreateSnapshot)?;
        self.require(Capability::Snapshot, DriverOperation::CreateSnapshot)?;

        let size_bytes = self
            .volumes
            .read()
            .await
            .get(volume)
            .map(|v| v.size_bytes)
            .ok_or_else(|| {
                self.failed(
                    DriverOperation::CreateSnapshot,
                    format!("volume {} not found", volume),
                )
            })?;

        let mut snapshots = self.snapshots.write().await;
        let info = snapshots
            .entry((volume.to_string(), snapshot.to_string()))
            .or_insert_with(|| SnapshotInfo {
                size_bytes,
                created: Some(Utc::now()),
            })
            .clone();

        info!("Created memory snapshot {}/{}", volume, snapshot);
        Ok(info)
    }

    async fn delete_snapshot(&self, volume: &str, snapshot: &str) -> Result<()> {
        self.enter(DriverOperation::DeleteSnapshot)?;

        self.snapshots
            .write()
            .await
            .remove(&(volume.to_string(), snapshot.to_string()));
        Ok(())
    }

    async fn publish_volume(&self, name: &str, node: &Node) -> Result<AccessInfo> {
        self.enter(DriverOperation::PublishVolume)?;

        let lun = self
            .volumes
            .read()
            .await
            .get(name)
            .map(|v| v.lun)
            .ok_or_else(|| {
                self.failed(
                    DriverOperation::PublishVolume,
                    format!("volume {} not found", name),
                )
            })?;

        let info = match self.config.protocol {
            Protocol::Block => {
                if node.iqn.is_empty() {
                    return Err(self.failed(
                        DriverOperation::PublishVolume,
                        format!("node {} has no iSCSI initiator name", node.name),
                    ));
                }
                let target_portals = if self.config.target_portals.is_empty() {
                    vec![format!("{}:3260", self.config.server_ip)]
                } else {
                    self.config.target_portals.clone()
                };
                AccessInfo::Iscsi {
                    target_iqn: format!("iqn.2010-01.io.memory:{}", self.backend),
                    target_portals,
                    lun,
                    igroup: node.name.clone(),
                }
            }
            Protocol::File | Protocol::Any => AccessInfo::Nfs {
                server_ip: self.config.server_ip.clone(),
                path: format!("/{}", name),
            },
        };

        self.published
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(node.name.clone());

        Ok(info)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::Relaxed))
    }
}
