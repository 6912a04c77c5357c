//! Volume Lifecycle
//!
//! Add, clone, delete, resize and publish. Every mutating backend call is
//! bracketed by a logged transaction so an interrupted operation can be
//! resolved at the next bootstrap.

use crate::controlplane::catalog::BackendHandle;
use crate::controlplane::events::EngineEvent;
use crate::controlplane::guard;
use crate::controlplane::orchestrator::Orchestrator;
use crate::domain::ports::{AccessInfo, Capability, CloneSource, DriverOperation, VolumeOptions};
use crate::error::{Error, Result};
use crate::persistence::VolumeTransaction;
use crate::storage::{snapshot_id, Node, Protocol, Volume, VolumeConfig, VolumeState};
use crate::storage_class::{matcher, MatchRequest};
use tracing::{debug, info, warn};

impl Orchestrator {
    // =========================================================================
    // Add / Clone
    // =========================================================================

    /// Provision a volume, or clone one when the config names a source.
    ///
    /// An existing volume of at least the requested size is returned as is.
    pub async fn add_volume(&self, config: VolumeConfig) -> Result<Volume> {
        let name = config.name.clone();
        let result = self.add_volume_inner(config).await;
        self.finish("add_volume", &name, &result);
        result
    }

    async fn add_volume_inner(&self, config: VolumeConfig) -> Result<Volume> {
        self.ensure_ready()?;
        config.validate()?;
        if config.is_clone() {
            return self.clone_volume_inner(config).await;
        }

        let _claim = self.acquire(guard::volume_key(&config.name))?;
        if let Some(existing) = self.existing_volume(&config)? {
            return Ok(existing);
        }

        let class = self
            .catalog
            .storage_class(&config.storage_class)
            .ok_or_else(|| Error::not_found("StorageClass", &config.storage_class))?;
        let choice = self.select_pool(&class, &config)?;
        let handle = self
            .catalog
            .backend(choice.backend_uuid)
            .ok_or_else(|| Error::not_found("Backend", &choice.backend_name))?;

        let mut config = config;
        if config.protocol == Protocol::Any {
            config.protocol = choice.protocol;
        }
        let volume = Volume::new(config, choice.backend_uuid, choice.pool);
        let options = VolumeOptions::from(&volume.config);

        info!(
            "Creating volume {} ({} bytes) on {}:{}",
            volume.name(),
            volume.size_bytes(),
            handle.backend.name,
            volume.pool
        );

        let txn = VolumeTransaction::add_volume(&volume);
        self.catalog.reserve_volume(volume.clone())?;
        if let Err(e) = self.begin(&txn).await {
            self.release_reservation(&volume).await;
            return Err(e);
        }

        let result = self
            .call_backend(
                &handle,
                DriverOperation::CreateVolume,
                handle.driver.create_volume(
                    volume.name(),
                    &volume.pool,
                    volume.size_bytes(),
                    &options,
                ),
            )
            .await;
        self.complete_provision(volume, &handle, &txn, result).await
    }

    /// Clone a volume or one of its snapshots onto the source's pool
    pub async fn clone_volume(&self, config: VolumeConfig) -> Result<Volume> {
        let name = config.name.clone();
        let result = async {
            self.ensure_ready()?;
            config.validate()?;
            self.clone_volume_inner(config).await
        }
        .await;
        self.finish("clone_volume", &name, &result);
        result
    }

    async fn clone_volume_inner(&self, config: VolumeConfig) -> Result<Volume> {
        let Some(source_name) = config.clone_source_volume.clone() else {
            return Err(Error::InvalidArgument(format!(
                "volume {} does not name a clone source",
                config.name
            )));
        };

        let _claim = self.acquire(guard::volume_key(&config.name))?;
        if let Some(existing) = self.existing_volume(&config)? {
            return Ok(existing);
        }

        let source = self
            .catalog
            .volume(&source_name)
            .ok_or_else(|| Error::not_found("Volume", &source_name))?;
        if source.state != VolumeState::Online {
            return Err(Error::InvalidArgument(format!(
                "clone source {} is {}",
                source_name, source.state
            )));
        }

        let (clone_source, source_size) = match &config.clone_source_snapshot {
            Some(snapshot) => {
                let found = self
                    .catalog
                    .snapshot(&source_name, snapshot)
                    .ok_or_else(|| {
                        Error::not_found("Snapshot", snapshot_id(&source_name, snapshot))
                    })?;
                (
                    CloneSource::Snapshot {
                        volume: source_name.clone(),
                        snapshot: snapshot.clone(),
                    },
                    found.size_bytes,
                )
            }
            None => (
                CloneSource::Volume {
                    volume: source_name.clone(),
                },
                source.size_bytes(),
            ),
        };
        if config.size_bytes > source_size {
            return Err(Error::InvalidArgument(format!(
                "clone {} requests {} bytes but its source has {}; resize after cloning",
                config.name, config.size_bytes, source_size
            )));
        }

        let handle = self.online_backend_for(&source)?;
        if !handle.driver.capabilities().contains(Capability::Clone) {
            return Err(Error::unsupported(
                DriverOperation::CloneVolume.as_str(),
                format!("backend {} does not support cloning", handle.backend.name),
            ));
        }

        let mut config = config;
        if config.storage_class.is_empty() {
            config.storage_class = source.config.storage_class.clone();
        }
        if let Some(class) = self.catalog.storage_class(&config.storage_class) {
            let admitted = matcher::candidates(
                &class,
                &MatchRequest::from(&config),
                &self.catalog.backends(),
            )
            .iter()
            .any(|c| c.backend_uuid == source.backend_uuid);
            if !admitted {
                return Err(Error::unsupported(
                    DriverOperation::CloneVolume.as_str(),
                    format!(
                        "storage class {} admits no pool on backend {}",
                        config.storage_class, handle.backend.name
                    ),
                ));
            }
        }

        config.size_bytes = source_size;
        if config.protocol == Protocol::Any {
            config.protocol = source.config.protocol;
        }
        let volume = Volume::new(config, source.backend_uuid, source.pool.clone());
        let options = VolumeOptions::from(&volume.config);

        info!(
            "Cloning volume {} from {:?} on {}:{}",
            volume.name(),
            clone_source,
            handle.backend.name,
            volume.pool
        );

        let txn = VolumeTransaction::add_volume(&volume);
        self.catalog.reserve_volume(volume.clone())?;
        if let Err(e) = self.begin(&txn).await {
            self.release_reservation(&volume).await;
            return Err(e);
        }

        let result = self
            .call_backend(
                &handle,
                DriverOperation::CloneVolume,
                handle
                    .driver
                    .clone_volume(volume.name(), &clone_source, &options),
            )
            .await;
        self.complete_provision(volume, &handle, &txn, result).await
    }

    /// An existing volume satisfies a request when it is at least as large
    fn existing_volume(&self, config: &VolumeConfig) -> Result<Option<Volume>> {
        match self.catalog.volume(&config.name) {
            Some(existing) if existing.size_bytes() >= config.size_bytes => {
                debug!("Volume {} already exists", config.name);
                Ok(Some(existing))
            }
            Some(_) => Err(Error::already_exists("Volume", &config.name)),
            None => Ok(None),
        }
    }

    async fn complete_provision(
        &self,
        mut volume: Volume,
        handle: &BackendHandle,
        txn: &VolumeTransaction,
        result: Result<()>,
    ) -> Result<Volume> {
        if let Err(e) = result {
            self.commit(txn).await;
            self.release_reservation(&volume).await;
            return Err(e);
        }

        volume.state = VolumeState::Online;
        if let Err(e) = self.store.add_volume(&volume).await {
            match handle.driver.delete_volume(volume.name()).await {
                Ok(()) => {
                    self.commit(txn).await;
                    self.release_reservation(&volume).await;
                }
                Err(cleanup) => {
                    warn!(
                        "Failed to clean up volume {} after persist failure, leaving transaction for recovery: {}",
                        volume.name(),
                        cleanup
                    );
                    self.catalog.remove_volume(volume.name());
                }
            }
            return Err(e);
        }

        self.catalog.put_volume(volume.clone());
        self.commit(txn).await;

        info!("Volume {} is online", volume.name());
        self.emit(EngineEvent::VolumeCreated {
            name: volume.name().to_string(),
            backend: handle.backend.name.clone(),
            pool: volume.pool.clone(),
            size_bytes: volume.size_bytes(),
        });
        Ok(volume)
    }

    /// Drop a volume that was never provisioned
    async fn release_reservation(&self, volume: &Volume) {
        self.catalog.remove_volume(volume.name());
        self.reap_backend_if_deleting(volume.backend_uuid).await;
    }

    pub(super) fn online_backend_for(&self, volume: &Volume) -> Result<BackendHandle> {
        let handle = self.backend_for(volume)?;
        if !handle.backend.state.is_online() {
            return Err(Error::BackendUnavailable {
                backend: handle.backend.name.clone(),
                reason: format!("backend is {}", handle.backend.state),
            });
        }
        Ok(handle)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a volume; deleting an absent volume succeeds
    pub async fn delete_volume(&self, name: &str) -> Result<()> {
        let result = self.delete_volume_inner(name).await;
        self.finish("delete_volume", name, &result);
        result
    }

    async fn delete_volume_inner(&self, name: &str) -> Result<()> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::volume_key(name))?;

        let Some(volume) = self.catalog.volume(name) else {
            debug!("Volume {} already absent", name);
            return Ok(());
        };

        let snapshots = self.catalog.snapshots_for_volume(name);
        if !snapshots.is_empty() {
            return Err(Error::VolumeHasSnapshots {
                volume: name.to_string(),
                count: snapshots.len(),
            });
        }
        let snapshot_guard = guard::snapshot_prefix(name);
        if self.in_flight.any_with_prefix(&snapshot_guard) {
            return Err(Error::InProgress {
                name: snapshot_guard,
            });
        }

        let Some(handle) = self.catalog.backend(volume.backend_uuid) else {
            warn!("Backend of volume {} is gone, removing the record only", name);
            self.store.delete_volume(name).await?;
            self.catalog.remove_volume(name);
            self.emit(EngineEvent::VolumeDeleted {
                name: name.to_string(),
            });
            return Ok(());
        };

        info!("Deleting volume {} from {}", name, handle.backend.name);
        let txn = VolumeTransaction::delete_volume(&volume);
        self.begin(&txn).await?;
        self.catalog.set_volume_state(name, VolumeState::Deleting);

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::DeleteVolume,
                handle.driver.delete_volume(name),
            )
            .await
        {
            self.catalog.set_volume_state(name, volume.state);
            self.commit(&txn).await;
            return Err(e);
        }

        if let Err(e) = self.store.delete_volume(name).await {
            warn!(
                "Volume {} deleted on backend but its record remains; leaving transaction for recovery",
                name
            );
            return Err(e);
        }

        self.catalog.remove_volume(name);
        self.commit(&txn).await;
        self.emit(EngineEvent::VolumeDeleted {
            name: name.to_string(),
        });

        self.reap_backend_if_deleting(volume.backend_uuid).await;
        Ok(())
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Grow a volume; requesting the current size is a no-op
    pub async fn resize_volume(&self, name: &str, size_bytes: u64) -> Result<Volume> {
        let result = self.resize_volume_inner(name, size_bytes).await;
        self.finish("resize_volume", name, &result);
        result
    }

    async fn resize_volume_inner(&self, name: &str, size_bytes: u64) -> Result<Volume> {
        self.ensure_ready()?;
        let _claim = self.acquire(guard::volume_key(name))?;

        let volume = self
            .catalog
            .volume(name)
            .ok_or_else(|| Error::not_found("Volume", name))?;

        let handle = self.online_backend_for(&volume)?;
        if !handle.driver.capabilities().contains(Capability::Resize) {
            return Err(Error::unsupported(
                DriverOperation::ResizeVolume.as_str(),
                format!("backend {} does not support resizing", handle.backend.name),
            ));
        }

        let current = volume.size_bytes();
        if size_bytes == current {
            return Ok(volume);
        }
        if size_bytes < current {
            return Err(Error::InvalidArgument(format!(
                "cannot shrink volume {} from {} to {} bytes",
                name, current, size_bytes
            )));
        }

        info!("Resizing volume {}: {} -> {} bytes", name, current, size_bytes);
        let txn = VolumeTransaction::resize_volume(&volume, size_bytes);
        self.begin(&txn).await?;

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::ResizeVolume,
                handle.driver.resize_volume(name, size_bytes),
            )
            .await
        {
            self.commit(&txn).await;
            return Err(e);
        }

        let mut resized = volume;
        resized.config.size_bytes = size_bytes;
        self.store.update_volume(&resized).await?;

        self.catalog.put_volume(resized.clone());
        self.commit(&txn).await;
        self.emit(EngineEvent::VolumeResized {
            name: name.to_string(),
            size_bytes,
        });
        Ok(resized)
    }

    // =========================================================================
    // Publish and Queries
    // =========================================================================

    /// Ask the volume's backend how `node` should reach it
    pub async fn publish_volume(&self, name: &str, node: &Node) -> Result<AccessInfo> {
        let result = self.publish_volume_inner(name, node).await;
        self.finish("publish_volume", name, &result);
        result
    }

    async fn publish_volume_inner(&self, name: &str, node: &Node) -> Result<AccessInfo> {
        self.ensure_ready()?;
        let volume = self
            .catalog
            .volume(name)
            .ok_or_else(|| Error::not_found("Volume", name))?;
        let handle = self.online_backend_for(&volume)?;

        debug!("Publishing volume {} to node {}", name, node.name);
        self.call_backend(
            &handle,
            DriverOperation::PublishVolume,
            handle.driver.publish_volume(name, node),
        )
        .await
    }

    pub fn get_volume(&self, name: &str) -> Result<Volume> {
        self.catalog
            .volume(name)
            .ok_or_else(|| Error::not_found("Volume", name))
    }

    pub fn list_volumes(&self) -> Vec<Volume> {
        self.catalog.volumes()
    }
}
