//! Catalog
//!
//! In-memory index of backends, storage classes, volumes, snapshots and
//! nodes behind a single reader/writer lock. Accessors copy data out; the
//! lock is never held across an `.await`.

use crate::domain::ports::StorageDriverRef;
use crate::error::{Error, Result};
use crate::storage::{Backend, BackendState, Node, Snapshot, Volume, VolumeState};
use crate::storage_class::StorageClassConfig;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A backend together with its live driver
#[derive(Clone)]
pub struct BackendHandle {
    pub backend: Backend,
    pub driver: StorageDriverRef,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("backend", &self.backend)
            .field("driver", &self.driver.kind())
            .finish()
    }
}

/// Entity counts for status reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub backends: usize,
    pub online_backends: usize,
    pub storage_classes: usize,
    pub volumes: usize,
    pub snapshots: usize,
    pub nodes: usize,
}

#[derive(Default)]
struct CatalogState {
    backends: BTreeMap<Uuid, BackendHandle>,
    backend_names: BTreeMap<String, Uuid>,
    storage_classes: BTreeMap<String, StorageClassConfig>,
    volumes: BTreeMap<String, Volume>,
    snapshots: BTreeMap<(String, String), Snapshot>,
    nodes: BTreeMap<String, Node>,
}

#[derive(Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> CatalogCounts {
        let state = self.state.read();
        CatalogCounts {
            backends: state.backends.len(),
            online_backends: state
                .backends
                .values()
                .filter(|h| h.backend.state.is_online())
                .count(),
            storage_classes: state.storage_classes.len(),
            volumes: state.volumes.len(),
            snapshots: state.snapshots.len(),
            nodes: state.nodes.len(),
        }
    }

    // =========================================================================
    // Backends
    // =========================================================================

    /// Register a backend; its name must be unused
    pub fn add_backend(&self, handle: BackendHandle) -> Result<()> {
        let mut state = self.state.write();
        if state.backend_names.contains_key(&handle.backend.name) {
            return Err(Error::already_exists("Backend", &handle.backend.name));
        }
        state
            .backend_names
            .insert(handle.backend.name.clone(), handle.backend.uuid);
        state.backends.insert(handle.backend.uuid, handle);
        Ok(())
    }

    /// Replace the backend with the same UUID
    pub fn replace_backend(&self, handle: BackendHandle) {
        let mut state = self.state.write();
        state
            .backend_names
            .insert(handle.backend.name.clone(), handle.backend.uuid);
        state.backends.insert(handle.backend.uuid, handle);
    }

    pub fn remove_backend(&self, uuid: Uuid) -> Option<BackendHandle> {
        let mut state = self.state.write();
        let handle = state.backends.remove(&uuid)?;
        state.backend_names.remove(&handle.backend.name);
        Some(handle)
    }

    pub fn backend(&self, uuid: Uuid) -> Option<BackendHandle> {
        self.state.read().backends.get(&uuid).cloned()
    }

    pub fn backend_by_name(&self, name: &str) -> Option<BackendHandle> {
        let state = self.state.read();
        state
            .backend_names
            .get(name)
            .and_then(|uuid| state.backends.get(uuid))
            .cloned()
    }

    /// Snapshot of every backend, for matching and listing
    pub fn backends(&self) -> Vec<Backend> {
        self.state
            .read()
            .backends
            .values()
            .map(|h| h.backend.clone())
            .collect()
    }

    pub fn backend_handles(&self) -> Vec<BackendHandle> {
        self.state.read().backends.values().cloned().collect()
    }

    /// Change a backend's state; returns the updated backend if it changed
    pub fn set_backend_state(
        &self,
        uuid: Uuid,
        new_state: BackendState,
        reason: Option<String>,
    ) -> Option<(BackendState, Backend)> {
        let mut state = self.state.write();
        let handle = state.backends.get_mut(&uuid)?;
        let previous = handle.backend.state;
        if previous == new_state && handle.backend.state_reason == reason {
            return None;
        }
        handle.backend.state = new_state;
        handle.backend.state_reason = reason;
        Some((previous, handle.backend.clone()))
    }

    /// Mark a backend Deleting so no new volume can be placed on it.
    ///
    /// Returns the previous state and the number of volumes still on it,
    /// counted under the same write lock.
    pub fn begin_backend_removal(&self, uuid: Uuid) -> Option<(BackendState, usize)> {
        let mut state = self.state.write();
        let volume_count = state
            .volumes
            .values()
            .filter(|v| v.backend_uuid == uuid)
            .count();
        let handle = state.backends.get_mut(&uuid)?;
        let previous = handle.backend.state;
        handle.backend.state = BackendState::Deleting;
        Some((previous, volume_count))
    }

    pub fn backend_volume_count(&self, uuid: Uuid) -> usize {
        self.state
            .read()
            .volumes
            .values()
            .filter(|v| v.backend_uuid == uuid)
            .count()
    }

    // =========================================================================
    // Storage Classes
    // =========================================================================

    pub fn add_storage_class(&self, config: StorageClassConfig) -> Result<()> {
        let mut state = self.state.write();
        if state.storage_classes.contains_key(&config.name) {
            return Err(Error::already_exists("StorageClass", &config.name));
        }
        state.storage_classes.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn storage_class(&self, name: &str) -> Option<StorageClassConfig> {
        self.state.read().storage_classes.get(name).cloned()
    }

    pub fn storage_classes(&self) -> Vec<StorageClassConfig> {
        self.state.read().storage_classes.values().cloned().collect()
    }

    pub fn remove_storage_class(&self, name: &str) -> Option<StorageClassConfig> {
        self.state.write().storage_classes.remove(name)
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Insert or replace a volume
    pub fn put_volume(&self, volume: Volume) {
        self.state
            .write()
            .volumes
            .insert(volume.config.name.clone(), volume);
    }

    /// Insert a new volume only while its backend is present and online
    pub fn reserve_volume(&self, volume: Volume) -> Result<()> {
        let mut state = self.state.write();
        match state.backends.get(&volume.backend_uuid) {
            Some(handle) if handle.backend.state.is_online() => {}
            Some(handle) => {
                return Err(Error::BackendUnavailable {
                    backend: handle.backend.name.clone(),
                    reason: format!("backend is {}", handle.backend.state),
                })
            }
            None => {
                return Err(Error::not_found(
                    "Backend",
                    volume.backend_uuid.to_string(),
                ))
            }
        }
        state.volumes.insert(volume.config.name.clone(), volume);
        Ok(())
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.state.read().volumes.get(name).cloned()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.state.read().volumes.values().cloned().collect()
    }

    pub fn remove_volume(&self, name: &str) -> Option<Volume> {
        self.state.write().volumes.remove(name)
    }

    pub fn set_volume_state(&self, name: &str, new_state: VolumeState) -> bool {
        match self.state.write().volumes.get_mut(name) {
            Some(volume) => {
                volume.state = new_state;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn put_snapshot(&self, snapshot: Snapshot) {
        let key = (
            snapshot.config.volume_name.clone(),
            snapshot.config.name.clone(),
        );
        self.state.write().snapshots.insert(key, snapshot);
    }

    pub fn snapshot(&self, volume: &str, name: &str) -> Option<Snapshot> {
        self.state
            .read()
            .snapshots
            .get(&(volume.to_string(), name.to_string()))
            .cloned()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.read().snapshots.values().cloned().collect()
    }

    /// Snapshots with this name on any volume
    pub fn snapshots_by_name(&self, name: &str) -> Vec<Snapshot> {
        self.state
            .read()
            .snapshots
            .values()
            .filter(|s| s.config.name == name)
            .cloned()
            .collect()
    }

    pub fn snapshots_for_volume(&self, volume: &str) -> Vec<Snapshot> {
        self.state
            .read()
            .snapshots
            .range((volume.to_string(), String::new())..)
            .take_while(|((v, _), _)| v == volume)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn remove_snapshot(&self, volume: &str, name: &str) -> Option<Snapshot> {
        self.state
            .write()
            .snapshots
            .remove(&(volume.to_string(), name.to_string()))
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn put_node(&self, node: Node) {
        self.state.write().nodes.insert(node.name.clone(), node);
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state.read().nodes.get(name).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn remove_node(&self, name: &str) -> Option<Node> {
        self.state.write().nodes.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{MemoryDriver, MemoryDriverConfig};
    use crate::storage::{BackendConfig, Protocol, SnapshotConfig, VolumeConfig};
    use chrono::Utc;
    use std::sync::Arc;

    fn handle(name: &str) -> BackendHandle {
        BackendHandle {
            backend: Backend {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
                driver_kind: "memory".to_string(),
                protocol: Protocol::File,
                state: BackendState::Online,
                state_reason: None,
                pools: BTreeMap::new(),
                config: BackendConfig::new(name, "memory"),
                registered_at: Utc::now(),
            },
            driver: Arc::new(MemoryDriver::new(name, MemoryDriverConfig::default())),
        }
    }

    fn snapshot(volume: &str, name: &str) -> Snapshot {
        Snapshot {
            config: SnapshotConfig::new(volume, name),
            created: Utc::now(),
            size_bytes: 1,
        }
    }

    #[test]
    fn test_backend_index() {
        let catalog = Catalog::new();
        let nas = handle("nas-1");
        let uuid = nas.backend.uuid;

        catalog.add_backend(nas.clone()).unwrap();
        assert!(catalog.add_backend(handle("nas-1")).is_err());
        assert_eq!(catalog.backend_by_name("nas-1").unwrap().backend.uuid, uuid);

        let (previous, updated) = catalog
            .set_backend_state(uuid, BackendState::Failed, Some("timeout".into()))
            .unwrap();
        assert_eq!(previous, BackendState::Online);
        assert_eq!(updated.state, BackendState::Failed);
        assert!(catalog
            .set_backend_state(uuid, BackendState::Failed, Some("timeout".into()))
            .is_none());
        assert_eq!(catalog.counts().online_backends, 0);

        catalog.remove_backend(uuid).unwrap();
        assert!(catalog.backend_by_name("nas-1").is_none());
    }

    #[test]
    fn test_volume_counts_per_backend() {
        let catalog = Catalog::new();
        let uuid = Uuid::new_v4();
        catalog.put_volume(Volume::new(VolumeConfig::new("v1", 1, "gold"), uuid, "p"));
        catalog.put_volume(Volume::new(VolumeConfig::new("v2", 1, "gold"), uuid, "p"));
        catalog.put_volume(Volume::new(VolumeConfig::new("v3", 1, "gold"), Uuid::new_v4(), "p"));

        assert_eq!(catalog.backend_volume_count(uuid), 2);
        assert!(catalog.set_volume_state("v1", VolumeState::Deleting));
        assert_eq!(catalog.volume("v1").unwrap().state, VolumeState::Deleting);
        assert!(!catalog.set_volume_state("missing", VolumeState::Online));
    }

    #[test]
    fn test_reservation_and_removal_exclude_each_other() {
        let catalog = Catalog::new();
        let nas = handle("nas-1");
        let uuid = nas.backend.uuid;
        catalog.add_backend(nas).unwrap();

        catalog
            .reserve_volume(Volume::new(VolumeConfig::new("v1", 1, "gold"), uuid, "p"))
            .unwrap();
        assert_eq!(
            catalog.begin_backend_removal(uuid),
            Some((BackendState::Online, 1))
        );

        // A deleting backend takes no new volumes
        let result =
            catalog.reserve_volume(Volume::new(VolumeConfig::new("v2", 1, "gold"), uuid, "p"));
        assert!(matches!(result, Err(Error::BackendUnavailable { .. })));
        assert!(catalog.volume("v2").is_none());

        let result = catalog.reserve_volume(Volume::new(
            VolumeConfig::new("v3", 1, "gold"),
            Uuid::new_v4(),
            "p",
        ));
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(catalog.begin_backend_removal(Uuid::new_v4()), None);
    }

    #[test]
    fn test_snapshot_lookups() {
        let catalog = Catalog::new();
        catalog.put_snapshot(snapshot("v1", "a"));
        catalog.put_snapshot(snapshot("v1", "b"));
        catalog.put_snapshot(snapshot("v10", "a"));
        catalog.put_snapshot(snapshot("v2", "a"));

        assert_eq!(catalog.snapshots_for_volume("v1").len(), 2);
        assert_eq!(catalog.snapshots_for_volume("v10").len(), 1);
        assert_eq!(catalog.snapshots_by_name("a").len(), 3);

        catalog.remove_snapshot("v1", "a").unwrap();
        assert!(catalog.snapshot("v1", "a").is_none());
    }
}
