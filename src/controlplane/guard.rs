//! Operation-in-progress guard
//!
//! At most one mutating operation runs per resource name. A second caller
//! is rejected immediately with [`Error::InProgress`] instead of waiting.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Guard key held while bootstrap runs
pub const BOOTSTRAP_KEY: &str = "bootstrap";

/// Guard key for a volume
pub fn volume_key(name: &str) -> String {
    format!("volume:{}", name)
}

/// Guard key for a snapshot
pub fn snapshot_key(volume: &str, snapshot: &str) -> String {
    format!("snapshot:{}/{}", volume, snapshot)
}

/// Guard key for a snapshot name across all volumes
pub fn snapshot_name_key(snapshot: &str) -> String {
    format!("snapshot-name:{}", snapshot)
}

/// Prefix shared by every snapshot guard key of a volume
pub fn snapshot_prefix(volume: &str) -> String {
    format!("snapshot:{}/", volume)
}

/// Guard key for a backend
pub fn backend_key(name: &str) -> String {
    format!("backend:{}", name)
}

/// Names with an operation in flight
#[derive(Debug, Default)]
pub struct OperationGuard {
    in_flight: DashMap<String, DateTime<Utc>>,
}

impl OperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a name, failing fast if it is already claimed
    pub fn try_acquire(&self, key: String) -> Result<InFlight<'_>> {
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => Err(Error::InProgress {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                entry.insert(Utc::now());
                Ok(InFlight { owner: self, key })
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn any_with_prefix(&self, prefix: &str) -> bool {
        self.in_flight.iter().any(|e| e.key().starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Releases its claim when dropped
#[derive(Debug)]
pub struct InFlight<'a> {
    owner: &'a OperationGuard,
    key: String,
}

impl InFlight<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_second_claim_rejected() {
        let guard = OperationGuard::new();

        let first = guard.try_acquire(volume_key("pvc-1")).unwrap();
        assert_matches!(
            guard.try_acquire(volume_key("pvc-1")),
            Err(Error::InProgress { name }) if name == "volume:pvc-1"
        );

        // Other names are unaffected
        let _other = guard.try_acquire(volume_key("pvc-2")).unwrap();
        assert_eq!(guard.len(), 2);

        drop(first);
        assert!(!guard.contains("volume:pvc-1"));
        assert!(guard.try_acquire(volume_key("pvc-1")).is_ok());
    }

    #[test]
    fn test_prefix_lookup() {
        let guard = OperationGuard::new();
        let _claim = guard.try_acquire(snapshot_key("pvc-1", "snap-a")).unwrap();

        assert!(guard.any_with_prefix(&snapshot_prefix("pvc-1")));
        assert!(!guard.any_with_prefix(&snapshot_prefix("pvc-10")));

        // Name claims are not counted against any volume
        let _name = guard.try_acquire(snapshot_name_key("pvc-2")).unwrap();
        assert!(!guard.any_with_prefix(&snapshot_prefix("pvc-2")));
    }
}
