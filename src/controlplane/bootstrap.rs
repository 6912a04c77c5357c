//! Bootstrap and Recovery
//!
//! Loads persisted state into the catalog and resolves transactions left
//! behind by operations that never finished. Mutations are rejected with
//! `NotReady` until this completes.

use crate::controlplane::catalog::BackendHandle;
use crate::controlplane::events::{EngineEvent, RecoveryAction};
use crate::controlplane::guard;
use crate::controlplane::orchestrator::Orchestrator;
use crate::domain::ports::DriverOperation;
use crate::error::{Error, Result};
use crate::persistence::{TransactionOp, VolumeTransaction};
use crate::storage::Backend;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

fn load_error(what: &'static str) -> impl FnOnce(Error) -> Error {
    move |e| Error::Bootstrap(format!("failed to load {}: {}", what, e))
}

impl Orchestrator {
    /// Load persisted state and resolve pending transactions.
    ///
    /// Calling this again after it succeeded is a no-op. Any store failure
    /// other than an absent key aborts with [`Error::Bootstrap`].
    pub async fn bootstrap(&self) -> Result<()> {
        if self.is_ready() {
            debug!("Orchestrator already bootstrapped");
            return Ok(());
        }
        let _claim = self.acquire(guard::BOOTSTRAP_KEY.to_string())?;
        if self.is_ready() {
            debug!("Orchestrator bootstrapped while waiting");
            return Ok(());
        }

        info!("Bootstrapping from store {}", self.store.client_name());

        let backends = self.load_backends().await?;
        self.load_storage_classes().await?;
        let volumes = self.load_volumes().await?;
        self.load_snapshots_and_nodes().await?;
        let recovered = self.recover_transactions().await?;

        self.metrics.set_pending_transactions(0);
        self.ready.store(true, Ordering::Release);

        info!(
            "Bootstrap complete: {} backend(s), {} volume(s), {} transaction(s) recovered",
            backends, volumes, recovered
        );
        self.emit(EngineEvent::BootstrapCompleted {
            backends,
            volumes,
            recovered_transactions: recovered,
        });
        Ok(())
    }

    async fn load_backends(&self) -> Result<usize> {
        let records = self
            .store
            .get_backends()
            .await
            .map_err(load_error("backends"))?;

        for record in &records {
            let driver = self.factory.create(&record.config).map_err(|e| {
                Error::Bootstrap(format!("backend {}: {}", record.name, e))
            })?;

            let mut backend = Backend {
                uuid: record.uuid,
                name: record.name.clone(),
                driver_kind: driver.kind().to_string(),
                protocol: driver.protocol(),
                state: record.state,
                state_reason: record.state_reason.clone(),
                pools: BTreeMap::new(),
                config: record.config.clone(),
                registered_at: record.registered_at,
            };
            self.discover(&mut backend, &driver).await;

            if backend.state != record.state {
                info!(
                    "Backend {} is {} after discovery (was {})",
                    backend.name, backend.state, record.state
                );
                if let Err(e) = self.store.update_backend(&backend.to_record()).await {
                    warn!("Failed to persist state of backend {}: {}", backend.name, e);
                }
            }

            self.catalog
                .add_backend(BackendHandle { backend, driver })
                .map_err(load_error("backends"))?;
        }

        Ok(records.len())
    }

    async fn load_storage_classes(&self) -> Result<()> {
        let classes = self
            .store
            .get_storage_classes()
            .await
            .map_err(load_error("storage classes"))?;

        for class in classes {
            self.catalog
                .add_storage_class(class)
                .map_err(load_error("storage classes"))?;
        }
        Ok(())
    }

    async fn load_volumes(&self) -> Result<usize> {
        let volumes = self
            .store
            .get_volumes()
            .await
            .map_err(load_error("volumes"))?;
        let count = volumes.len();

        for volume in volumes {
            if self.catalog.backend(volume.backend_uuid).is_none() {
                warn!(
                    "Volume {} references unknown backend {}",
                    volume.name(),
                    volume.backend_uuid
                );
            }
            self.catalog.put_volume(volume);
        }
        Ok(count)
    }

    async fn load_snapshots_and_nodes(&self) -> Result<()> {
        for snapshot in self
            .store
            .get_snapshots()
            .await
            .map_err(load_error("snapshots"))?
        {
            if self.catalog.volume(&snapshot.config.volume_name).is_none() {
                warn!("Snapshot {} references unknown volume", snapshot.id());
            }
            self.catalog.put_snapshot(snapshot);
        }

        for node in self.store.get_nodes().await.map_err(load_error("nodes"))? {
            self.catalog.put_node(node);
        }
        Ok(())
    }

    // =========================================================================
    // Transaction Recovery
    // =========================================================================

    async fn recover_transactions(&self) -> Result<usize> {
        let pending = self
            .transactions
            .list()
            .await
            .map_err(load_error("transactions"))?;

        for txn in &pending {
            let action = self.recover(txn).await?;

            self.transactions
                .commit(txn)
                .await
                .map_err(load_error("transactions"))?;

            info!(
                "Recovered {} transaction for {}: {}",
                txn.op,
                txn.key(),
                action
            );
            self.metrics
                .record_recovery(txn.op.as_str(), &action.to_string());
            self.emit(EngineEvent::TransactionRecovered {
                name: txn.key().to_string(),
                op: txn.op,
                action,
            });
        }

        Ok(pending.len())
    }

    async fn recover(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        match txn.op {
            TransactionOp::AddVolume => self.recover_add_volume(txn).await,
            TransactionOp::DeleteVolume => self.recover_delete_volume(txn).await,
            TransactionOp::ResizeVolume => self.recover_resize_volume(txn).await,
            TransactionOp::AddSnapshot => self.recover_add_snapshot(txn).await,
            TransactionOp::DeleteSnapshot => self.recover_delete_snapshot(txn).await,
        }
    }

    fn recovery_backend(&self, txn: &VolumeTransaction) -> Option<BackendHandle> {
        let handle = self.catalog.backend(txn.backend_uuid);
        if handle.is_none() {
            warn!(
                "Backend {} of {} transaction for {} is gone",
                txn.backend_uuid,
                txn.op,
                txn.key()
            );
        }
        handle
    }

    fn abandon(txn: &VolumeTransaction, e: &Error) -> RecoveryAction {
        warn!(
            "Could not resolve {} transaction for {}: {}",
            txn.op,
            txn.key(),
            e
        );
        RecoveryAction::Abandoned
    }

    async fn recover_add_volume(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        let Some(config) = txn.volume_config() else {
            return Ok(RecoveryAction::Abandoned);
        };
        if self.catalog.volume(&config.name).is_some() {
            return Ok(RecoveryAction::DiscardedStale);
        }
        let Some(handle) = self.recovery_backend(txn) else {
            return Ok(RecoveryAction::Abandoned);
        };

        let op = if config.is_clone() {
            DriverOperation::CloneVolume
        } else {
            DriverOperation::CreateVolume
        };
        debug!("Rolling back {} of volume {}", op, config.name);

        match self
            .call_backend(
                &handle,
                DriverOperation::DeleteVolume,
                handle.driver.delete_volume(&config.name),
            )
            .await
        {
            Ok(()) => Ok(RecoveryAction::RolledBack),
            Err(e) => Ok(Self::abandon(txn, &e)),
        }
    }

    async fn recover_delete_volume(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        let Some(config) = txn.volume_config() else {
            return Ok(RecoveryAction::Abandoned);
        };
        if self.catalog.volume(&config.name).is_none() {
            return Ok(RecoveryAction::DiscardedStale);
        }
        let Some(handle) = self.recovery_backend(txn) else {
            return Ok(RecoveryAction::Abandoned);
        };

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::DeleteVolume,
                handle.driver.delete_volume(&config.name),
            )
            .await
        {
            return Ok(Self::abandon(txn, &e));
        }

        self.store
            .delete_volume(&config.name)
            .await
            .map_err(load_error("volumes"))?;
        self.catalog.remove_volume(&config.name);
        self.emit(EngineEvent::VolumeDeleted {
            name: config.name.clone(),
        });
        self.reap_backend_if_deleting(txn.backend_uuid).await;
        Ok(RecoveryAction::Completed)
    }

    async fn recover_resize_volume(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        let Some(config) = txn.volume_config() else {
            return Ok(RecoveryAction::Abandoned);
        };
        let (Some(volume), Some(target)) = (self.catalog.volume(&config.name), txn.size_bytes)
        else {
            return Ok(RecoveryAction::DiscardedStale);
        };
        if volume.size_bytes() >= target {
            return Ok(RecoveryAction::DiscardedStale);
        }
        let Some(handle) = self.recovery_backend(txn) else {
            return Ok(RecoveryAction::Abandoned);
        };

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::ResizeVolume,
                handle.driver.resize_volume(&config.name, target),
            )
            .await
        {
            return Ok(Self::abandon(txn, &e));
        }

        let mut resized = volume;
        resized.config.size_bytes = target;
        self.store
            .update_volume(&resized)
            .await
            .map_err(load_error("volumes"))?;
        self.catalog.put_volume(resized);
        self.emit(EngineEvent::VolumeResized {
            name: config.name.clone(),
            size_bytes: target,
        });
        Ok(RecoveryAction::Completed)
    }

    async fn recover_add_snapshot(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        let Some(config) = txn.snapshot_config() else {
            return Ok(RecoveryAction::Abandoned);
        };
        if self
            .catalog
            .snapshot(&config.volume_name, &config.name)
            .is_some()
        {
            return Ok(RecoveryAction::DiscardedStale);
        }
        let Some(handle) = self.recovery_backend(txn) else {
            return Ok(RecoveryAction::Abandoned);
        };

        match self
            .call_backend(
                &handle,
                DriverOperation::DeleteSnapshot,
                handle
                    .driver
                    .delete_snapshot(&config.volume_name, &config.name),
            )
            .await
        {
            Ok(()) => Ok(RecoveryAction::RolledBack),
            Err(e) => Ok(Self::abandon(txn, &e)),
        }
    }

    async fn recover_delete_snapshot(&self, txn: &VolumeTransaction) -> Result<RecoveryAction> {
        let Some(config) = txn.snapshot_config() else {
            return Ok(RecoveryAction::Abandoned);
        };
        if self
            .catalog
            .snapshot(&config.volume_name, &config.name)
            .is_none()
        {
            return Ok(RecoveryAction::DiscardedStale);
        }
        let Some(handle) = self.recovery_backend(txn) else {
            return Ok(RecoveryAction::Abandoned);
        };

        if let Err(e) = self
            .call_backend(
                &handle,
                DriverOperation::DeleteSnapshot,
                handle
                    .driver
                    .delete_snapshot(&config.volume_name, &config.name),
            )
            .await
        {
            return Ok(Self::abandon(txn, &e));
        }

        self.store
            .delete_snapshot(&config.volume_name, &config.name)
            .await
            .map_err(load_error("snapshots"))?;
        self.catalog
            .remove_snapshot(&config.volume_name, &config.name);
        self.emit(EngineEvent::SnapshotDeleted {
            volume: config.volume_name.clone(),
            name: config.name.clone(),
        });
        Ok(RecoveryAction::Completed)
    }
}
