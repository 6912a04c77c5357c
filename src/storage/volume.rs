//! Volumes

use super::{AccessMode, Protocol};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested configuration of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub access_mode: AccessMode,
    pub storage_class: String,
    /// Volume to clone from
    #[serde(default)]
    pub clone_source_volume: Option<String>,
    /// Snapshot of the source volume to clone from
    #[serde(default)]
    pub clone_source_snapshot: Option<String>,
}

impl VolumeConfig {
    pub fn new(name: impl Into<String>, size_bytes: u64, storage_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            protocol: Protocol::Any,
            access_mode: AccessMode::ReadWriteOnce,
            storage_class: storage_class.into(),
            clone_source_volume: None,
            clone_source_snapshot: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Clone from an existing volume, optionally from one of its snapshots
    pub fn cloned_from(mut self, volume: impl Into<String>, snapshot: Option<String>) -> Self {
        self.clone_source_volume = Some(volume.into());
        self.clone_source_snapshot = snapshot;
        self
    }

    pub fn is_clone(&self) -> bool {
        self.clone_source_volume.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("volume", &self.name)?;
        if self.size_bytes == 0 && !self.is_clone() {
            return Err(Error::InvalidArgument(format!(
                "volume {} must have a non-zero size",
                self.name
            )));
        }
        if self.clone_source_snapshot.is_some() && self.clone_source_volume.is_none() {
            return Err(Error::InvalidArgument(format!(
                "volume {} names a clone source snapshot without a source volume",
                self.name
            )));
        }
        Ok(())
    }
}

/// Reject empty names and names that would break store key layout
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} name must not be empty", kind)));
    }
    if name.contains('/') {
        return Err(Error::InvalidArgument(format!(
            "{} name '{}' must not contain '/'",
            kind, name
        )));
    }
    Ok(())
}

/// Lifecycle state of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Creating,
    Online,
    Deleting,
    Failed,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeState::Creating => write!(f, "creating"),
            VolumeState::Online => write!(f, "online"),
            VolumeState::Deleting => write!(f, "deleting"),
            VolumeState::Failed => write!(f, "failed"),
        }
    }
}

/// A provisioned volume and its placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub config: VolumeConfig,
    pub backend_uuid: Uuid,
    pub pool: String,
    pub state: VolumeState,
}

impl Volume {
    pub fn new(config: VolumeConfig, backend_uuid: Uuid, pool: impl Into<String>) -> Self {
        Self {
            config,
            backend_uuid,
            pool: pool.into(),
            state: VolumeState::Creating,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn size_bytes(&self) -> u64 {
        self.config.size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_validate() {
        assert!(VolumeConfig::new("pvc-1", 1 << 30, "gold").validate().is_ok());
        assert_matches!(
            VolumeConfig::new("", 1, "gold").validate(),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            VolumeConfig::new("a/b", 1, "gold").validate(),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            VolumeConfig::new("pvc-1", 0, "gold").validate(),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn test_clone_may_omit_size() {
        let config = VolumeConfig::new("pvc-2", 0, "gold").cloned_from("pvc-1", None);
        assert!(config.is_clone());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_deserializing() {
        let config: VolumeConfig =
            serde_json::from_str(r#"{"name":"v","size_bytes":10,"storage_class":"gold"}"#).unwrap();
        assert_eq!(config.protocol, Protocol::Any);
        assert_eq!(config.access_mode, AccessMode::ReadWriteOnce);
        assert!(config.clone_source_volume.is_none());
    }
}
