//! Engine Events
//!
//! Events broadcast by the orchestrator so adapters can react to backend,
//! volume and snapshot lifecycle changes.

use crate::persistence::TransactionOp;
use crate::storage::BackendState;
use serde::{Deserialize, Serialize};

/// What bootstrap did with a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Committed state already matched the intent
    DiscardedStale,
    /// Backend state left behind by an unfinished create was cleaned up
    RolledBack,
    /// An unfinished delete or resize was carried out
    Completed,
    /// The backend call failed; the transaction was dropped and state left as is
    Abandoned,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryAction::DiscardedStale => write!(f, "discarded_stale"),
            RecoveryAction::RolledBack => write!(f, "rolled_back"),
            RecoveryAction::Completed => write!(f, "completed"),
            RecoveryAction::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A backend was registered
    BackendAdded {
        name: String,
        state: BackendState,
        pool_count: usize,
    },

    /// A backend's configuration was replaced and rediscovered
    BackendUpdated {
        name: String,
        state: BackendState,
        pool_count: usize,
    },

    /// A backend changed state
    BackendStateChanged {
        name: String,
        from: BackendState,
        to: BackendState,
        reason: Option<String>,
    },

    /// A backend was removed
    BackendRemoved { name: String },

    StorageClassAdded { name: String },

    StorageClassDeleted { name: String },

    /// A volume was created or cloned
    VolumeCreated {
        name: String,
        backend: String,
        pool: String,
        size_bytes: u64,
    },

    VolumeDeleted { name: String },

    VolumeResized { name: String, size_bytes: u64 },

    SnapshotCreated { volume: String, name: String },

    SnapshotDeleted { volume: String, name: String },

    /// Bootstrap resolved a pending transaction
    TransactionRecovered {
        name: String,
        op: TransactionOp,
        action: RecoveryAction,
    },

    /// Bootstrap finished and mutations are accepted
    BootstrapCompleted {
        backends: usize,
        volumes: usize,
        recovered_transactions: usize,
    },
}

impl EngineEvent {
    /// Name of the resource this event concerns
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            EngineEvent::BackendAdded { name, .. }
            | EngineEvent::BackendUpdated { name, .. }
            | EngineEvent::BackendStateChanged { name, .. }
            | EngineEvent::BackendRemoved { name }
            | EngineEvent::StorageClassAdded { name }
            | EngineEvent::StorageClassDeleted { name }
            | EngineEvent::VolumeCreated { name, .. }
            | EngineEvent::VolumeDeleted { name }
            | EngineEvent::VolumeResized { name, .. }
            | EngineEvent::SnapshotCreated { name, .. }
            | EngineEvent::SnapshotDeleted { name, .. }
            | EngineEvent::TransactionRecovered { name, .. } => Some(name),
            EngineEvent::BootstrapCompleted { .. } => None,
        }
    }

    /// Check if this is a backend-level event
    pub fn is_backend_event(&self) -> bool {
        matches!(
            self,
            EngineEvent::BackendAdded { .. }
                | EngineEvent::BackendUpdated { .. }
                | EngineEvent::BackendStateChanged { .. }
                | EngineEvent::BackendRemoved { .. }
        )
    }

    /// Check if this is a volume or snapshot event
    pub fn is_volume_event(&self) -> bool {
        matches!(
            self,
            EngineEvent::VolumeCreated { .. }
                | EngineEvent::VolumeDeleted { .. }
                | EngineEvent::VolumeResized { .. }
                | EngineEvent::SnapshotCreated { .. }
                | EngineEvent::SnapshotDeleted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        let event = EngineEvent::BackendStateChanged {
            name: "nas-1".to_string(),
            from: BackendState::Online,
            to: BackendState::Failed,
            reason: Some("timeout".to_string()),
        };
        assert_eq!(event.resource_name(), Some("nas-1"));
        assert!(event.is_backend_event());
        assert!(!event.is_volume_event());

        let event = EngineEvent::SnapshotCreated {
            volume: "pvc-1".to_string(),
            name: "snap-a".to_string(),
        };
        assert_eq!(event.resource_name(), Some("snap-a"));
        assert!(event.is_volume_event());
    }

    #[test]
    fn test_bootstrap_event_has_no_resource() {
        let event = EngineEvent::BootstrapCompleted {
            backends: 1,
            volumes: 2,
            recovered_transactions: 0,
        };
        assert!(event.resource_name().is_none());
        assert_eq!(RecoveryAction::RolledBack.to_string(), "rolled_back");
    }
}
