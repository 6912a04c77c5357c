//! Storage classes and pool matching

pub mod config;
pub mod matcher;

pub use config::StorageClassConfig;
pub use matcher::{candidates, pick, select, MatchRequest, PoolCandidate};
