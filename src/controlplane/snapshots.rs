//! Snapshot Lifecycle

use crate::controlplane::events::EngineEvent;
use crate::controlplane::guard;
use crate::controlplane::orchestrator::Orchestrator;
use crate::domain::ports::{Capability, DriverOperation};
use crate::error::{Error, Result};
use crate::persistence::VolumeTransaction;
use crate::storage::{snapshot_id, Snapshot, SnapshotConfig, VolumeState};
use chrono::Utc;
use tracing::{debug, info, warn};

impl Orchestrator {
    /// Snapshot a volume.
    ///
    /// Repeating a request for the same volume returns the existing snapshot;
    /// reusing the name on another volume is a conflict.
    pub async fn create_snapshot(&self, config: SnapshotConfig) -> Result<Snapshot> {
        let id = config.id();
        let result = self.create_snapshot_inner(config).await;
        self.finish("create_snapshot", &id, &result);
        result
    }

    async fn create_snapshot_inner(&self, config: SnapshotConfig) -> Result<Snapshot> {
        self.ensure_ready()?;
        config.validate()?;
        // The name claim spans volumes so the cross-volume check below holds
        let _name_claim = self.acquire(guard::snapshot_name_key(&config.name))?;
        let _claim = self.acquire(guard::snapshot_key(&config.volume_name, &config.name))?;

        if let Some(existing) = self.catalog.snapshot(&config.volume_name, &config.name) {
            debug!("Snapshot {} already exists", config.id());
            return Ok(existing);
        }
        if let Some(other) = self
            .catalog
            .snapshots_by_name(&config.name)
            .into_iter()
            .find(|s| s.config.volume_name != config.volume_name)
        {
            return Err(Error::SnapshotExistsOnOtherVolume {
                snapshot: config.name,
                volume: other.config.volume_name,
            });
        }

        let volume = self
            .catalog
            .volume(&config.volume_name)
            .ok_or_else(|| Error::not_found("Volume", &config.volume_name))?;
        let volume_guard = guard::volume_key(&config.volume_name);
        if volume.state != VolumeState::Online || self.in_flight.contains(&volume_guard) {
            return Err(Error::InProgress { name: volume_guard });
        }

        let handle = self.online_backend_for(&volume)?;
        if !handle.driver.capabilities().contains(Capability::Snapshot) {
            return Err(Error::unsupported(
                DriverOperation::CreateSnapshot.as_str(),
                format!("backend {} does not support snapshots", handle.backend.name),
            ));
        }

        info!("Creating snapshot {} on {}", config.id(), handle.backend.name);
        let txn = VolumeTransaction::add_snapshot(&config, volume.backend_uuid);
        self.begin(&txn).await?;

        let info = match self
            .call_backend(
                &handle,
                DriverOperation::CreateSnapshot,
                handle
                    .driver
                    .create_snapshot(&config.volume_name, &config.name),
            )
            .await
        {
            Ok(info) => info,
            Err(e) => {
                self.commit(&txn).await;
                return Err(e);
            }
        };

        let snapshot = Snapshot {
            created: info.created.unwrap_or_else(Utc::now),
            size_bytes: info.size_bytes,
            config,
        };

        if let Err(e) = self.store.add_snapshot(&snapshot).await {
            match handle
                .driver
                .delete_snapshot(&snapshot.config.volume_name, &snapshot.config.name)
                .await
            {
                Ok(()) => self.commit(&txn).await,
                Err(cleanup) => warn!(
                    "Failed to clean up snapshot {} after persist failure, leaving transaction for recovery: {}",
                    snapshot.id(),
                    cleanup
                ),
            }
            return Err(e);
        }

        self.catalog.put_snapshot(snapshot.clone());
        self.commit(&txn).await;
        self.emit(EngineEvent::SnapshotCreated {
            volume: snapshot.config.volume_name.clone(),
            name: snapshot.config.name.clone(),
        });
        Ok(snapshot)
    }

    /// Delete a snapshot; deleting an absent snapshot succeeds
    pub async fn delete_snapshot(&self, volume: &str, name: &str) -> Result<()> {
        let id = snapshot_id(volume, name);
        let result = self.delete_snapshot_inner(volume, name).await;
        self.finish("delete_snapshot", &id, &result);
        result
    }

    async fn delete_snapshot_inner(&self, volume: &str, name: &str) -> Result<()> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::snapshot_key(volume, name))?;

        let Some(snapshot) = self.catalog.snapshot(volume, name) else {
            debug!("Snapshot {} already absent", snapshot_id(volume, name));
            return Ok(());
        };

        let handle = self
            .catalog
            .volume(volume)
            .and_then(|v| self.catalog.backend(v.backend_uuid));
        let Some(handle) = handle else {
            warn!(
                "Backend of snapshot {} is gone, removing the record only",
                snapshot.id()
            );
            self.store.delete_snapshot(volume, name).await?;
            self.catalog.remove_snapshot(volume, name);
            self.emit(EngineEvent::SnapshotDeleted {
                volume: volume.to_string(),
                name: name.to_string(),
            });
            return Ok(());
        };

        info!("Deleting snapshot {} from {}", snapshot.id(), handle.backend.name);
        let txn = VolumeTransaction::delete_snapshot(&snapshot.config, handle.backend.uuid);
        self.begin(&txn).await?;

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::DeleteSnapshot,
                handle.driver.delete_snapshot(volume, name),
            )
            .await
        {
            self.commit(&txn).await;
            return Err(e);
        }

        self.store.delete_snapshot(volume, name).await?;
        self.catalog.remove_snapshot(volume, name);
        self.commit(&txn).await;
        self.emit(EngineEvent::SnapshotDeleted {
            volume: volume.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn get_snapshot(&self, volume: &str, name: &str) -> Result<Snapshot> {
        self.catalog
            .snapshot(volume, name)
            .ok_or_else(|| Error::not_found("Snapshot", snapshot_id(volume, name)))
    }

    pub fn list_snapshots(&self) -> Vec<Snapshot> {
        self.catalog.snapshots()
    }

    /// Snapshots with this name, on any volume
    pub fn list_snapshots_by_name(&self, name: &str) -> Vec<Snapshot> {
        self.catalog.snapshots_by_name(name)
    }

    pub fn list_snapshots_for_volume(&self, volume: &str) -> Vec<Snapshot> {
        self.catalog.snapshots_for_volume(volume)
    }
}
