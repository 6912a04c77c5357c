//! Access protocols and access modes

use serde::{Deserialize, Serialize};

/// Protocol a backend exposes volumes over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Block devices (iSCSI, NVMe-oF)
    Block,
    /// Shared filesystems (NFS)
    File,
    /// No preference
    #[default]
    Any,
}

impl Protocol {
    /// Check whether a backend offering `self` can serve a request for `requested`
    pub fn serves(&self, requested: Protocol) -> bool {
        matches!(requested, Protocol::Any) || matches!(self, Protocol::Any) || *self == requested
    }

    /// Check whether this protocol can honour an access mode.
    ///
    /// Multi-node read-write needs a shared filesystem.
    pub fn supports(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::ReadWriteMany => !matches!(self, Protocol::Block),
            _ => true,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Block => write!(f, "block"),
            Protocol::File => write!(f, "file"),
            Protocol::Any => write!(f, "any"),
        }
    }
}

/// How a volume may be attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Single node read-write
    #[default]
    ReadWriteOnce,
    /// Many nodes read-only
    ReadOnlyMany,
    /// Many nodes read-write
    ReadWriteMany,
    /// No preference
    Any,
}

impl AccessMode {
    pub fn is_multi_node(&self) -> bool {
        matches!(self, AccessMode::ReadOnlyMany | AccessMode::ReadWriteMany)
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadWriteOnce => write!(f, "ReadWriteOnce"),
            AccessMode::ReadOnlyMany => write!(f, "ReadOnlyMany"),
            AccessMode::ReadWriteMany => write!(f, "ReadWriteMany"),
            AccessMode::Any => write!(f, "Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_compatibility() {
        assert!(Protocol::Block.serves(Protocol::Any));
        assert!(Protocol::Any.serves(Protocol::File));
        assert!(Protocol::File.serves(Protocol::File));
        assert!(!Protocol::Block.serves(Protocol::File));
    }

    #[test]
    fn test_multi_writer_needs_file() {
        assert!(!Protocol::Block.supports(AccessMode::ReadWriteMany));
        assert!(Protocol::File.supports(AccessMode::ReadWriteMany));
        assert!(Protocol::Any.supports(AccessMode::ReadWriteMany));
        assert!(Protocol::Block.supports(AccessMode::ReadOnlyMany));
    }
}
