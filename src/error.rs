//! Error types for the Storage Orchestrator
//!
//! Provides the typed error taxonomy returned by the provisioning engine,
//! the persisted store, and backend drivers.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a persisted key/value store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Key already exists: {key}")]
    KeyExists { key: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check if this is the distinguishable "key not found" condition
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound { .. })
    }
}

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Snapshot {snapshot} already exists on a different volume ({volume})")]
    SnapshotExistsOnOtherVolume { snapshot: String, volume: String },

    #[error("Volume {volume} has {count} snapshot(s)")]
    VolumeHasSnapshots { volume: String, count: usize },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Unsupported operation {operation}: {reason}")]
    Unsupported { operation: String, reason: String },

    #[error("No suitable backend for storage class {storage_class}: {reason}")]
    NoSuitableBackend { storage_class: String, reason: String },

    #[error("Operation already in progress for {name}")]
    InProgress { name: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend} - {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Orchestrator is not ready; bootstrap has not completed")]
    NotReady,

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Persistent store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action an external control loop should take on error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Shorthand for a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action the caller should take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::BackendUnavailable { .. } | Error::Io(_) => ErrorAction::RequeueWithBackoff,
            Error::Store(e) if !e.is_key_not_found() => ErrorAction::RequeueWithBackoff,

            // Guard hit - back off briefly and try again
            Error::InProgress { .. } => ErrorAction::RequeueAfter(Duration::from_secs(5)),

            // Still recovering
            Error::NotReady => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Placement issues - an operator has to add or fix a backend
            Error::NoSuitableBackend { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Caller errors - don't retry automatically
            Error::Configuration(_)
            | Error::InvalidArgument(_)
            | Error::AlreadyExists { .. }
            | Error::SnapshotExistsOnOtherVolume { .. }
            | Error::Unsupported { .. }
            | Error::Bootstrap(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::BackendUnavailable { .. } | Error::InProgress { .. } | Error::NotReady => true,
            Error::Store(e) => !e.is_key_not_found(),
            _ => false,
        }
    }

    /// Short stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::SnapshotExistsOnOtherVolume { .. } => "already_exists",
            Error::VolumeHasSnapshots { .. } => "volume_has_snapshots",
            Error::Unsupported { .. } => "unsupported",
            Error::NoSuitableBackend { .. } => "no_suitable_backend",
            Error::InProgress { .. } => "in_progress",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::BackendOperationFailed { .. } => "backend_failed",
            Error::Bootstrap(_) => "bootstrap",
            Error::NotReady => "not_ready",
            Error::Store(_) => "store",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }

    /// Check if this error reports an absent resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Store(e) => e.is_key_not_found(),
            _ => false,
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::InProgress {
            name: "vol-1".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueAfter(Duration::from_secs(5)));

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::NoSuitableBackend {
            storage_class: "gold".into(),
            reason: "no pools".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueAfter(Duration::from_secs(60)));
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::BackendUnavailable {
            backend: "nas-1".into(),
            reason: "connection refused".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let exists = Error::already_exists("Volume", "v1");
        assert!(!exists.is_retryable());
        assert!(!exists.is_transient());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::not_found("Volume", "v1").is_not_found());

        let store_miss = Error::from(StoreError::KeyNotFound {
            key: "/volume/v1".into(),
        });
        assert!(store_miss.is_not_found());
        assert!(!store_miss.is_transient());

        let store_down = Error::from(StoreError::Unavailable("timeout".into()));
        assert!(!store_down.is_not_found());
        assert!(store_down.is_transient());
    }
}
