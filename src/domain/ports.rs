//! Domain Ports - Core trait definitions for the provisioning engine
//!
//! These traits define the boundaries between the engine and external systems:
//! storage drivers that talk to real backends, and the persisted key/value
//! store that holds the catalog and the transaction log.

use crate::error::{Result, StoreError};
use crate::storage::{AccessMode, BackendConfig, DiscoveredPool, Node, Protocol, VolumeConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// Driver Capabilities
// =============================================================================

/// Optional operations a driver may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Clone,
    Resize,
    Snapshot,
    MultiAttach,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Clone => write!(f, "clone"),
            Capability::Resize => write!(f, "resize"),
            Capability::Snapshot => write!(f, "snapshot"),
            Capability::MultiAttach => write!(f, "multi-attach"),
        }
    }
}

/// Set of capabilities a driver reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        [
            Capability::Clone,
            Capability::Resize,
            Capability::Snapshot,
            Capability::MultiAttach,
        ]
        .into_iter()
        .collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Capabilities(iter.into_iter().collect())
    }
}

/// Backend call names, used for metrics labels and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DriverOperation {
    Initialize,
    CreateVolume,
    CloneVolume,
    DeleteVolume,
    ResizeVolume,
    CreateSnapshot,
    DeleteSnapshot,
    PublishVolume,
}

impl DriverOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOperation::Initialize => "initialize",
            DriverOperation::CreateVolume => "create_volume",
            DriverOperation::CloneVolume => "clone_volume",
            DriverOperation::DeleteVolume => "delete_volume",
            DriverOperation::ResizeVolume => "resize_volume",
            DriverOperation::CreateSnapshot => "create_snapshot",
            DriverOperation::DeleteSnapshot => "delete_snapshot",
            DriverOperation::PublishVolume => "publish_volume",
        }
    }
}

impl std::fmt::Display for DriverOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Driver Request/Response Types
// =============================================================================

/// Volume options passed through to the driver on create and clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    pub protocol: Protocol,
    pub access_mode: AccessMode,
    pub storage_class: String,
}

impl From<&VolumeConfig> for VolumeOptions {
    fn from(config: &VolumeConfig) -> Self {
        Self {
            protocol: config.protocol,
            access_mode: config.access_mode,
            storage_class: config.storage_class.clone(),
        }
    }
}

/// What a clone is taken from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneSource {
    Volume { volume: String },
    Snapshot { volume: String, snapshot: String },
}

impl CloneSource {
    pub fn volume(&self) -> &str {
        match self {
            CloneSource::Volume { volume } | CloneSource::Snapshot { volume, .. } => volume,
        }
    }
}

/// Result of a backend snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub size_bytes: u64,
    /// Backend creation time, when the backend reports one
    pub created: Option<DateTime<Utc>>,
}

/// Protocol-specific connection details for a published volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum AccessInfo {
    Nfs {
        server_ip: String,
        path: String,
    },
    Iscsi {
        target_iqn: String,
        target_portals: Vec<String>,
        lun: u32,
        igroup: String,
    },
}

impl AccessInfo {
    /// Flatten into the key/value publish context handed to the node
    pub fn to_publish_context(&self) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        match self {
            AccessInfo::Nfs { server_ip, path } => {
                context.insert("protocol".to_string(), "file".to_string());
                context.insert("nfsServerIp".to_string(), server_ip.clone());
                context.insert("nfsPath".to_string(), path.clone());
            }
            AccessInfo::Iscsi {
                target_iqn,
                target_portals,
                lun,
                igroup,
            } => {
                context.insert("protocol".to_string(), "block".to_string());
                context.insert("iscsiTargetIqn".to_string(), target_iqn.clone());
                context.insert("iscsiLunNumber".to_string(), lun.to_string());
                context.insert("iscsiIgroup".to_string(), igroup.clone());
                context.insert(
                    "iscsiTargetPortalCount".to_string(),
                    target_portals.len().to_string(),
                );
                for (i, portal) in target_portals.iter().enumerate() {
                    context.insert(format!("p{}", i + 1), portal.clone());
                }
            }
        }
        context
    }
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// Port to a concrete storage backend
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver kind (e.g. "memory")
    fn kind(&self) -> &str;

    /// Protocol volumes are exposed over
    fn protocol(&self) -> Protocol;

    /// Optional operations this driver supports
    fn capabilities(&self) -> Capabilities;

    /// Connect to the backend and discover its pools
    async fn initialize(&self, config: &BackendConfig) -> Result<Vec<DiscoveredPool>>;

    /// Create a volume in a pool
    async fn create_volume(
        &self,
        name: &str,
        pool: &str,
        size_bytes: u64,
        options: &VolumeOptions,
    ) -> Result<()>;

    /// Create a volume from an existing volume or snapshot
    async fn clone_volume(
        &self,
        name: &str,
        source: &CloneSource,
        options: &VolumeOptions,
    ) -> Result<()>;

    /// Delete a volume; deleting an absent volume succeeds
    async fn delete_volume(&self, name: &str) -> Result<()>;

    /// Grow a volume to a new size
    async fn resize_volume(&self, name: &str, size_bytes: u64) -> Result<()>;

    /// Snapshot a volume
    async fn create_snapshot(&self, volume: &str, snapshot: &str) -> Result<SnapshotInfo>;

    /// Delete a snapshot; deleting an absent snapshot succeeds
    async fn delete_snapshot(&self, volume: &str, snapshot: &str) -> Result<()>;

    /// Grant a node access to a volume
    async fn publish_volume(&self, name: &str, node: &Node) -> Result<AccessInfo>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Store Client Port
// =============================================================================

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Port to a persisted key/value store.
///
/// Reads, updates and deletes of absent keys fail with
/// [`StoreError::KeyNotFound`]; listing an empty prefix does too.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Create a key; fails if it exists
    async fn create(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn read(&self, key: &str) -> StoreResult<String>;

    /// Overwrite an existing key
    async fn update(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List keys under a prefix, sorted
    async fn read_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Delete every key under a prefix
    async fn delete_keys(&self, prefix: &str) -> StoreResult<()>;

    /// Store name for logging
    fn name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StorageDriverRef = Arc<dyn StorageDriver>;
pub type StoreClientRef = Arc<dyn StoreClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let caps: Capabilities = [Capability::Snapshot, Capability::Clone].into_iter().collect();
        assert!(caps.contains(Capability::Clone));
        assert!(!caps.contains(Capability::Resize));
        assert!(Capabilities::all().contains(Capability::MultiAttach));
        assert!(!Capabilities::none().contains(Capability::Snapshot));
        assert_eq!(format!("{}", Capability::MultiAttach), "multi-attach");
    }

    #[test]
    fn test_iscsi_publish_context() {
        let info = AccessInfo::Iscsi {
            target_iqn: "iqn.2010-01.io.memory:san-1".into(),
            target_portals: vec!["10.0.0.1:3260".into(), "10.0.0.2:3260".into()],
            lun: 3,
            igroup: "node-a".into(),
        };
        let context = info.to_publish_context();
        assert_eq!(context["iscsiTargetPortalCount"], "2");
        assert_eq!(context["p1"], "10.0.0.1:3260");
        assert_eq!(context["p2"], "10.0.0.2:3260");
        assert_eq!(context["iscsiLunNumber"], "3");
    }

    #[test]
    fn test_nfs_publish_context() {
        let info = AccessInfo::Nfs {
            server_ip: "10.0.0.5".into(),
            path: "/pvc-1".into(),
        };
        let context = info.to_publish_context();
        assert_eq!(context["nfsServerIp"], "10.0.0.5");
        assert_eq!(context["nfsPath"], "/pvc-1");
        assert_eq!(context["protocol"], "file");
    }
}
