//! Storage Orchestrator - Provisioning Engine
//!
//! Matches volume requests against storage classes, places them on backend
//! pools, and drives backend drivers through a crash-safe transaction log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Orchestrator (Provisioning Engine)              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │  Storage Class   │  │    In-Flight     │  │    Bootstrap /   │   │
//! │  │     Matcher      │  │      Guard       │  │     Recovery     │   │
//! │  └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘   │
//! │           └─────────────────────┼─────────────────────┘             │
//! │                     ┌───────────┴───────────┐                       │
//! │                     │        Catalog        │                       │
//! │                     │  (RwLock, never held  │                       │
//! │                     │   across an .await)   │                       │
//! │                     └───────────────────────┘                       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Persisted Store (StoreClient)     │  Backend Drivers (StorageDriver)│
//! │  ┌──────────────┐ ┌─────────────┐  │  ┌──────────────────────────┐   │
//! │  │ Transaction  │ │ File / Mem  │  │  │ memory (reference)       │   │
//! │  │     Log      │ │   stores    │  │  │ ...registered by kind    │   │
//! │  └──────────────┘ └─────────────┘  │  └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`attribute`]: Pool offers, class requests, selectors and pool lists
//! - [`storage`]: Backends, pools, volumes, snapshots and nodes
//! - [`storage_class`]: Storage class configuration and the pool matcher
//! - [`persistence`]: Store clients, typed records and the transaction log
//! - [`controlplane`]: Catalog, provisioning engine and bootstrap
//! - [`config`]: Seed file loading
//! - [`domain`]: Driver and store traits
//! - [`error`]: Error types and handling

pub mod attribute;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod storage;
pub mod storage_class;

// Re-export commonly used types
pub use controlplane::{
    BackendFactory, BackendRemoval, EngineEvent, MemoryDriver, MemoryDriverConfig, Orchestrator,
    OrchestratorConfig, OrchestratorStatus, RecoveryAction,
};

pub use domain::ports::{
    AccessInfo, Capabilities, Capability, CloneSource, SnapshotInfo, StorageDriver,
    StorageDriverRef, StoreClient, StoreClientRef, VolumeOptions,
};

pub use error::{Error, ErrorAction, Result, StoreError};

pub use persistence::{FileStore, FileStoreConfig, InMemoryStore};

pub use storage::{
    AccessMode, Backend, BackendConfig, BackendState, Node, Protocol, Snapshot, SnapshotConfig,
    Volume, VolumeConfig, VolumeState,
};

pub use storage_class::StorageClassConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
