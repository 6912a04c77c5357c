//! Volume transaction log
//!
//! Before any backend call that creates or destroys state, the engine
//! durably records the intent. The record is removed once the catalog
//! reflects the outcome; anything still present at startup is resolved by
//! bootstrap recovery. A new intent for the same resource replaces the old
//! one.

use super::store::{PersistentStore, TRANSACTION_PREFIX};
use crate::error::Result;
use crate::storage::{snapshot_id, SnapshotConfig, Volume, VolumeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Kind of operation a transaction guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionOp {
    AddVolume,
    DeleteVolume,
    ResizeVolume,
    AddSnapshot,
    DeleteSnapshot,
}

impl TransactionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOp::AddVolume => "add_volume",
            TransactionOp::DeleteVolume => "delete_volume",
            TransactionOp::ResizeVolume => "resize_volume",
            TransactionOp::AddSnapshot => "add_snapshot",
            TransactionOp::DeleteSnapshot => "delete_snapshot",
        }
    }
}

impl std::fmt::Display for TransactionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource a transaction is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKey {
    Volume(String),
    Snapshot { volume: String, snapshot: String },
}

impl TransactionKey {
    pub fn store_key(&self) -> String {
        match self {
            TransactionKey::Volume(name) => format!("{}volume/{}", TRANSACTION_PREFIX, name),
            TransactionKey::Snapshot { volume, snapshot } => {
                format!("{}snapshot/{}/{}", TRANSACTION_PREFIX, volume, snapshot)
            }
        }
    }
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKey::Volume(name) => write!(f, "{}", name),
            TransactionKey::Snapshot { volume, snapshot } => {
                write!(f, "{}", snapshot_id(volume, snapshot))
            }
        }
    }
}

/// Configuration captured with the intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransactionConfig {
    Volume(VolumeConfig),
    Snapshot(SnapshotConfig),
}

/// A durable record of an in-flight operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTransaction {
    pub op: TransactionOp,
    pub config: TransactionConfig,
    /// Backend the operation targets
    pub backend_uuid: Uuid,
    /// Pool chosen for a new volume
    #[serde(default)]
    pub pool: Option<String>,
    /// Target size of a resize
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl VolumeTransaction {
    fn for_volume(op: TransactionOp, volume: &Volume) -> Self {
        Self {
            op,
            config: TransactionConfig::Volume(volume.config.clone()),
            backend_uuid: volume.backend_uuid,
            pool: Some(volume.pool.clone()),
            size_bytes: None,
            started_at: Utc::now(),
        }
    }

    fn for_snapshot(op: TransactionOp, config: &SnapshotConfig, backend_uuid: Uuid) -> Self {
        Self {
            op,
            config: TransactionConfig::Snapshot(config.clone()),
            backend_uuid,
            pool: None,
            size_bytes: None,
            started_at: Utc::now(),
        }
    }

    pub fn add_volume(volume: &Volume) -> Self {
        Self::for_volume(TransactionOp::AddVolume, volume)
    }

    pub fn delete_volume(volume: &Volume) -> Self {
        Self::for_volume(TransactionOp::DeleteVolume, volume)
    }

    pub fn resize_volume(volume: &Volume, size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            ..Self::for_volume(TransactionOp::ResizeVolume, volume)
        }
    }

    pub fn add_snapshot(config: &SnapshotConfig, backend_uuid: Uuid) -> Self {
        Self::for_snapshot(TransactionOp::AddSnapshot, config, backend_uuid)
    }

    pub fn delete_snapshot(config: &SnapshotConfig, backend_uuid: Uuid) -> Self {
        Self::for_snapshot(TransactionOp::DeleteSnapshot, config, backend_uuid)
    }

    pub fn key(&self) -> TransactionKey {
        match &self.config {
            TransactionConfig::Volume(config) => TransactionKey::Volume(config.name.clone()),
            TransactionConfig::Snapshot(config) => TransactionKey::Snapshot {
                volume: config.volume_name.clone(),
                snapshot: config.name.clone(),
            },
        }
    }

    pub fn volume_config(&self) -> Option<&VolumeConfig> {
        match &self.config {
            TransactionConfig::Volume(config) => Some(config),
            TransactionConfig::Snapshot(_) => None,
        }
    }

    pub fn snapshot_config(&self) -> Option<&SnapshotConfig> {
        match &self.config {
            TransactionConfig::Snapshot(config) => Some(config),
            TransactionConfig::Volume(_) => None,
        }
    }
}

/// Durable log of in-flight operations
pub struct TransactionLog {
    store: Arc<PersistentStore>,
}

impl TransactionLog {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Durably record an intent before touching a backend
    pub async fn begin(&self, txn: &VolumeTransaction) -> Result<()> {
        self.store.put_volume_transaction(txn).await?;
        debug!("Began {} transaction for {}", txn.op, txn.key());
        Ok(())
    }

    /// Remove a finished intent; committing an absent record succeeds
    pub async fn commit(&self, txn: &VolumeTransaction) -> Result<()> {
        let key = txn.key();
        if !self.store.delete_volume_transaction(&key).await? {
            warn!("Committed {} transaction for {} was already gone", txn.op, key);
        }
        Ok(())
    }

    pub async fn get(&self, key: &TransactionKey) -> Result<Option<VolumeTransaction>> {
        self.store.get_volume_transaction(key).await
    }

    /// All outstanding intents
    pub async fn list(&self) -> Result<Vec<VolumeTransaction>> {
        self.store.get_volume_transactions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    fn log() -> TransactionLog {
        let store = PersistentStore::new(Arc::new(InMemoryStore::new()));
        TransactionLog::new(Arc::new(store))
    }

    fn volume(name: &str, class: &str) -> Volume {
        Volume::new(VolumeConfig::new(name, 1 << 30, class), Uuid::new_v4(), "aggr1")
    }

    #[tokio::test]
    async fn test_begin_commit() {
        let log = log();
        let txn = VolumeTransaction::add_volume(&volume("pvc-1", "gold"));

        log.begin(&txn).await.unwrap();
        assert_eq!(log.list().await.unwrap(), vec![txn.clone()]);
        assert_eq!(log.get(&txn.key()).await.unwrap(), Some(txn.clone()));

        log.commit(&txn).await.unwrap();
        assert!(log.list().await.unwrap().is_empty());

        // Committing twice is harmless
        log.commit(&txn).await.unwrap();
    }

    #[tokio::test]
    async fn test_later_transaction_replaces_earlier() {
        let log = log();
        log.begin(&VolumeTransaction::add_volume(&volume("pvc-1", "gold")))
            .await
            .unwrap();
        log.begin(&VolumeTransaction::add_volume(&volume("pvc-1", "silver")))
            .await
            .unwrap();

        let txns = log.list().await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].volume_config().unwrap().storage_class, "silver");
    }

    #[tokio::test]
    async fn test_snapshot_and_volume_keys_coexist() {
        let log = log();
        let backend = Uuid::new_v4();
        let vol = volume("pvc-1", "gold");

        log.begin(&VolumeTransaction::resize_volume(&vol, 2 << 30))
            .await
            .unwrap();
        log.begin(&VolumeTransaction::add_snapshot(
            &SnapshotConfig::new("pvc-1", "snap-a"),
            backend,
        ))
        .await
        .unwrap();

        let txns = log.list().await.unwrap();
        assert_eq!(txns.len(), 2);

        let snap = txns
            .iter()
            .find(|t| t.op == TransactionOp::AddSnapshot)
            .unwrap();
        assert_eq!(snap.key().to_string(), "pvc-1/snap-a");
        assert_eq!(
            snap.key().store_key(),
            "/transaction/snapshot/pvc-1/snap-a"
        );

        let resize = txns
            .iter()
            .find(|t| t.op == TransactionOp::ResizeVolume)
            .unwrap();
        assert_eq!(resize.size_bytes, Some(2 << 30));
    }
}
