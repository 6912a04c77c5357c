//! Storage Attributes
//!
//! Typed attribute offers (advertised by pools) and requests (made by storage
//! classes), the virtual-pool label selector, and the encoded
//! `backend:pool,pool;backend:pool` pool-list format.

pub mod pools;
pub mod request;
pub mod selector;
pub mod value;

pub use pools::PoolSet;
pub use request::AttributeRequest;
pub use selector::LabelSelector;
pub use value::AttributeValue;

// =============================================================================
// Well-Known Attribute Names
// =============================================================================

/// Media type of the pool (hdd, ssd, hybrid)
pub const MEDIA: &str = "media";
/// Thin or thick provisioning
pub const PROVISIONING_TYPE: &str = "provisioningType";
/// Driver kind that owns the pool
pub const BACKEND_TYPE: &str = "backendType";
/// IOPS the pool can sustain
pub const IOPS: &str = "IOPS";
/// Pool supports snapshots
pub const SNAPSHOTS: &str = "snapshots";
/// Pool supports clones
pub const CLONES: &str = "clones";
/// Pool encrypts data at rest
pub const ENCRYPTION: &str = "encryption";
/// Virtual-pool label selector
pub const SELECTOR: &str = "selector";

// =============================================================================
// Storage Class Parameter Keys
// =============================================================================

/// Explicit pool list a class is restricted to
pub const STORAGE_POOLS: &str = "storagePools";
/// Pools added to a class regardless of attributes
pub const ADDITIONAL_STORAGE_POOLS: &str = "additionalStoragePools";
/// Legacy spelling of `additionalStoragePools`
pub const REQUIRED_STORAGE: &str = "requiredStorage";
/// Pools removed from a class
pub const EXCLUDE_STORAGE_POOLS: &str = "excludeStoragePools";

/// Platform-defined parameters that are not storage attributes
pub const IGNORED_PARAMETERS: &[&str] = &["fsType"];
/// Prefix of platform-reserved parameters
pub const RESERVED_PARAMETER_PREFIX: &str = "csi.storage.k8s.io/";

/// Value type of a recognised attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Bool,
    Int,
    String,
    Selector,
}

/// Look up the value type of a recognised attribute name
pub fn attribute_kind(name: &str) -> Option<AttributeKind> {
    match name {
        SNAPSHOTS | CLONES | ENCRYPTION => Some(AttributeKind::Bool),
        IOPS => Some(AttributeKind::Int),
        MEDIA | PROVISIONING_TYPE | BACKEND_TYPE => Some(AttributeKind::String),
        SELECTOR => Some(AttributeKind::Selector),
        _ => None,
    }
}
