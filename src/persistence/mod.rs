//! Persistence layer
//!
//! Store clients (in-memory and file-backed), the typed record layer the
//! engine writes through, and the volume transaction log.

pub mod file;
pub mod memory;
pub mod store;
pub mod transaction;

pub use file::{FileStore, FileStoreConfig};
pub use memory::InMemoryStore;
pub use store::PersistentStore;
pub use transaction::{
    TransactionConfig, TransactionKey, TransactionLog, TransactionOp, VolumeTransaction,
};
