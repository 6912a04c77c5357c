//! Snapshots
//!
//! A snapshot is identified by the pair (volume, snapshot name), rendered as
//! the ID `"volume/snapshot"`.

use super::volume::validate_name;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build the external ID of a snapshot
pub fn snapshot_id(volume: &str, snapshot: &str) -> String {
    format!("{}/{}", volume, snapshot)
}

/// Split an external snapshot ID into (volume, snapshot)
pub fn parse_snapshot_id(id: &str) -> Result<(String, String)> {
    match id.split_once('/') {
        Some((volume, snapshot))
            if !volume.is_empty() && !snapshot.is_empty() && !snapshot.contains('/') =>
        {
            Ok((volume.to_string(), snapshot.to_string()))
        }
        _ => Err(Error::InvalidArgument(format!(
            "invalid snapshot ID '{}', expected volume/snapshot",
            id
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub name: String,
    pub volume_name: String,
}

impl SnapshotConfig {
    pub fn new(volume_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_name: volume_name.into(),
        }
    }

    pub fn id(&self) -> String {
        snapshot_id(&self.volume_name, &self.name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("snapshot", &self.name)?;
        validate_name("volume", &self.volume_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub config: SnapshotConfig,
    pub created: DateTime<Utc>,
    pub size_bytes: u64,
}

impl Snapshot {
    pub fn id(&self) -> String {
        self.config.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_id() {
        assert_eq!(snapshot_id("pvc-1", "snap-a"), "pvc-1/snap-a");
        assert_eq!(
            parse_snapshot_id("pvc-1/snap-a").unwrap(),
            ("pvc-1".to_string(), "snap-a".to_string())
        );
        assert!(parse_snapshot_id("pvc-1").is_err());
        assert!(parse_snapshot_id("/snap-a").is_err());
        assert!(parse_snapshot_id("a/b/c").is_err());
    }
}
