//! Storage data model
//!
//! Backends, pools, volumes, snapshots and nodes as tracked by the engine.

pub mod backend;
pub mod node;
pub mod protocol;
pub mod snapshot;
pub mod volume;

pub use backend::{Backend, BackendConfig, BackendRecord, BackendState, DiscoveredPool, Pool};
pub use node::Node;
pub use protocol::{AccessMode, Protocol};
pub use snapshot::{parse_snapshot_id, snapshot_id, Snapshot, SnapshotConfig};
pub use volume::{validate_name, Volume, VolumeConfig, VolumeState};
