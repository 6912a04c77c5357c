//! Typed records over a [`StoreClient`]
//!
//! Every record is stored as JSON under a fixed key layout:
//!
//! ```text
//! /backend/<name>
//! /storageclass/<name>
//! /volume/<name>
//! /snapshot/<volume>/<snapshot>
//! /node/<name>
//! /transaction/volume/<name>
//! /transaction/snapshot/<volume>/<snapshot>
//! ```

use super::transaction::{TransactionKey, VolumeTransaction};
use crate::domain::StoreClientRef;
use crate::error::{Result, StoreError};
use crate::storage::{BackendRecord, Node, Snapshot, Volume};
use crate::storage_class::StorageClassConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub const BACKEND_PREFIX: &str = "/backend/";
pub const STORAGE_CLASS_PREFIX: &str = "/storageclass/";
pub const VOLUME_PREFIX: &str = "/volume/";
pub const SNAPSHOT_PREFIX: &str = "/snapshot/";
pub const NODE_PREFIX: &str = "/node/";
pub const TRANSACTION_PREFIX: &str = "/transaction/";

pub fn backend_key(name: &str) -> String {
    format!("{}{}", BACKEND_PREFIX, name)
}

pub fn storage_class_key(name: &str) -> String {
    format!("{}{}", STORAGE_CLASS_PREFIX, name)
}

pub fn volume_key(name: &str) -> String {
    format!("{}{}", VOLUME_PREFIX, name)
}

pub fn snapshot_key(volume: &str, snapshot: &str) -> String {
    format!("{}{}/{}", SNAPSHOT_PREFIX, volume, snapshot)
}

pub fn node_key(name: &str) -> String {
    format!("{}{}", NODE_PREFIX, name)
}

/// Typed access to the engine's persisted state
pub struct PersistentStore {
    client: StoreClientRef,
}

impl PersistentStore {
    pub fn new(client: StoreClientRef) -> Self {
        Self { client }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    // =========================================================================
    // Generic Helpers
    // =========================================================================

    async fn create_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.client.create(key, &json).await?;
        debug!("Created store key {}", key);
        Ok(())
    }

    async fn update_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.client.update(key, &json).await?;
        debug!("Updated store key {}", key);
        Ok(())
    }

    /// Update a key, creating it if it does not exist
    async fn upsert_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        match self.client.update(key, &json).await {
            Ok(()) => Ok(()),
            Err(StoreError::KeyNotFound { .. }) => {
                self.client.create(key, &json).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.client.read(key).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(StoreError::KeyNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every record under a prefix; an empty prefix yields no records
    async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let keys = match self.client.read_keys(prefix).await {
            Ok(keys) => keys,
            Err(StoreError::KeyNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.read_json(&key).await? {
                Some(record) => records.push(record),
                None => warn!("Store key {} vanished while listing {}", key, prefix),
            }
        }
        Ok(records)
    }

    /// Delete a key; returns false if it was already absent
    async fn delete_key(&self, key: &str) -> Result<bool> {
        match self.client.delete(key).await {
            Ok(()) => {
                debug!("Deleted store key {}", key);
                Ok(true)
            }
            Err(StoreError::KeyNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Backends
    // =========================================================================

    pub async fn add_backend(&self, record: &BackendRecord) -> Result<()> {
        self.create_json(&backend_key(&record.name), record).await
    }

    pub async fn update_backend(&self, record: &BackendRecord) -> Result<()> {
        self.update_json(&backend_key(&record.name), record).await
    }

    pub async fn get_backend(&self, name: &str) -> Result<Option<BackendRecord>> {
        self.read_json(&backend_key(name)).await
    }

    pub async fn get_backends(&self) -> Result<Vec<BackendRecord>> {
        self.list_json(BACKEND_PREFIX).await
    }

    pub async fn delete_backend(&self, name: &str) -> Result<bool> {
        self.delete_key(&backend_key(name)).await
    }

    // =========================================================================
    // Storage Classes
    // =========================================================================

    pub async fn add_storage_class(&self, config: &StorageClassConfig) -> Result<()> {
        self.create_json(&storage_class_key(&config.name), config).await
    }

    pub async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClassConfig>> {
        self.read_json(&storage_class_key(name)).await
    }

    pub async fn get_storage_classes(&self) -> Result<Vec<StorageClassConfig>> {
        self.list_json(STORAGE_CLASS_PREFIX).await
    }

    pub async fn delete_storage_class(&self, name: &str) -> Result<bool> {
        self.delete_key(&storage_class_key(name)).await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn add_volume(&self, volume: &Volume) -> Result<()> {
        self.create_json(&volume_key(volume.name()), volume).await
    }

    pub async fn update_volume(&self, volume: &Volume) -> Result<()> {
        self.update_json(&volume_key(volume.name()), volume).await
    }

    pub async fn get_volume(&self, name: &str) -> Result<Option<Volume>> {
        self.read_json(&volume_key(name)).await
    }

    pub async fn get_volumes(&self) -> Result<Vec<Volume>> {
        self.list_json(VOLUME_PREFIX).await
    }

    pub async fn delete_volume(&self, name: &str) -> Result<bool> {
        self.delete_key(&volume_key(name)).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn add_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let key = snapshot_key(&snapshot.config.volume_name, &snapshot.config.name);
        self.create_json(&key, snapshot).await
    }

    pub async fn get_snapshot(&self, volume: &str, name: &str) -> Result<Option<Snapshot>> {
        self.read_json(&snapshot_key(volume, name)).await
    }

    pub async fn get_snapshots(&self) -> Result<Vec<Snapshot>> {
        self.list_json(SNAPSHOT_PREFIX).await
    }

    pub async fn delete_snapshot(&self, volume: &str, name: &str) -> Result<bool> {
        self.delete_key(&snapshot_key(volume, name)).await
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub async fn add_or_update_node(&self, node: &Node) -> Result<()> {
        self.upsert_json(&node_key(&node.name), node).await
    }

    pub async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        self.read_json(&node_key(name)).await
    }

    pub async fn get_nodes(&self) -> Result<Vec<Node>> {
        self.list_json(NODE_PREFIX).await
    }

    pub async fn delete_node(&self, name: &str) -> Result<bool> {
        self.delete_key(&node_key(name)).await
    }

    // =========================================================================
    // Volume Transactions
    // =========================================================================

    /// Write a transaction, replacing any earlier one with the same key
    pub async fn put_volume_transaction(&self, txn: &VolumeTransaction) -> Result<()> {
        self.upsert_json(&txn.key().store_key(), txn).await
    }

    pub async fn get_volume_transaction(
        &self,
        key: &TransactionKey,
    ) -> Result<Option<VolumeTransaction>> {
        self.read_json(&key.store_key()).await
    }

    pub async fn get_volume_transactions(&self) -> Result<Vec<VolumeTransaction>> {
        self.list_json(TRANSACTION_PREFIX).await
    }

    pub async fn delete_volume_transaction(&self, key: &TransactionKey) -> Result<bool> {
        self.delete_key(&key.store_key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use crate::storage::{Node, VolumeConfig, VolumeState};
    use std::sync::Arc;
    use uuid::Uuid;

    fn store() -> PersistentStore {
        PersistentStore::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_volume_records() {
        let store = store();
        let mut volume =
            Volume::new(VolumeConfig::new("pvc-1", 1024, "gold"), Uuid::new_v4(), "aggr1");
        volume.state = VolumeState::Online;

        store.add_volume(&volume).await.unwrap();
        assert!(store.add_volume(&volume).await.is_err());

        volume.config.size_bytes = 2048;
        store.update_volume(&volume).await.unwrap();

        let loaded = store.get_volume("pvc-1").await.unwrap().unwrap();
        assert_eq!(loaded.size_bytes(), 2048);
        assert_eq!(store.get_volumes().await.unwrap().len(), 1);

        assert!(store.delete_volume("pvc-1").await.unwrap());
        assert!(!store.delete_volume("pvc-1").await.unwrap());
        assert!(store.get_volume("pvc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_lists() {
        let store = store();
        assert!(store.get_backends().await.unwrap().is_empty());
        assert!(store.get_snapshots().await.unwrap().is_empty());
        assert!(store.get_volume_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_upsert() {
        let store = store();
        store
            .add_or_update_node(&Node::new("node-a").with_iqn("iqn.a"))
            .await
            .unwrap();
        store
            .add_or_update_node(&Node::new("node-a").with_iqn("iqn.b").with_ips(["10.0.0.9"]))
            .await
            .unwrap();

        let nodes = store.get_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].iqn, "iqn.b");
        assert_eq!(nodes[0].ips, vec!["10.0.0.9"]);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let client = Arc::new(InMemoryStore::new());
        let store = PersistentStore::new(client.clone());
        client.set_available(false);

        let err = store.get_volumes().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }
}
