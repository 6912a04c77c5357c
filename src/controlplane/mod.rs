//! Control Plane Module
//!
//! The "brain" of the storage orchestrator: the catalog, the provisioning
//! engine, and bootstrap recovery, coordinating volumes across backends.

pub mod backends;
pub mod bootstrap;
pub mod catalog;
pub mod events;
pub mod guard;
pub mod metrics;
pub mod orchestrator;
pub mod snapshots;
pub mod volumes;

#[cfg(test)]
pub(crate) mod test_support;

pub use backends::*;
pub use catalog::{BackendHandle, Catalog, CatalogCounts};
pub use events::{EngineEvent, RecoveryAction};
pub use guard::OperationGuard;
pub use metrics::EngineMetrics;
pub use orchestrator::*;
