//! Backends and the pools they expose

use super::Protocol;
use crate::attribute::AttributeValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Configuration a backend is registered with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name
    pub name: String,
    /// Driver kind (selects the driver constructor)
    pub driver: String,
    /// Driver-specific settings, opaque to the engine
    #[serde(default)]
    pub config: serde_json::Value,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Lifecycle state of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendState {
    /// Accepting new volumes
    Online,
    /// Suspended by an operator; existing volumes keep working
    Offline,
    /// Removal requested while volumes still exist
    Deleting,
    /// Driver could not be initialized or reported itself unreachable
    Failed,
}

impl BackendState {
    pub fn is_online(&self) -> bool {
        matches!(self, BackendState::Online)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Online => write!(f, "online"),
            BackendState::Offline => write!(f, "offline"),
            BackendState::Deleting => write!(f, "deleting"),
            BackendState::Failed => write!(f, "failed"),
        }
    }
}

/// Pool description a driver returns from discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPool {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl DiscoveredPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A placement target within a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub backend_uuid: Uuid,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub labels: BTreeMap<String, String>,
}

impl Pool {
    pub fn from_discovered(backend_uuid: Uuid, discovered: DiscoveredPool) -> Self {
        Self {
            name: discovered.name,
            backend_uuid,
            attributes: discovered.attributes,
            labels: discovered.labels,
        }
    }
}

/// A registered backend as the engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub uuid: Uuid,
    pub name: String,
    pub driver_kind: String,
    pub protocol: Protocol,
    pub state: BackendState,
    /// Why the backend is not online, if known
    pub state_reason: Option<String>,
    pub pools: BTreeMap<String, Pool>,
    pub config: BackendConfig,
    pub registered_at: DateTime<Utc>,
}

impl Backend {
    pub fn pool(&self, name: &str) -> Option<&Pool> {
        self.pools.get(name)
    }

    /// Replace the pool set with freshly discovered pools
    pub fn set_pools(&mut self, discovered: Vec<DiscoveredPool>) {
        self.pools = discovered
            .into_iter()
            .map(|p| (p.name.clone(), Pool::from_discovered(self.uuid, p)))
            .collect();
    }

    pub fn to_record(&self) -> BackendRecord {
        BackendRecord {
            uuid: self.uuid,
            name: self.name.clone(),
            config: self.config.clone(),
            state: self.state,
            state_reason: self.state_reason.clone(),
            registered_at: self.registered_at,
        }
    }
}

/// Persisted form of a backend; pools are rediscovered on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRecord {
    pub uuid: Uuid,
    pub name: String,
    pub config: BackendConfig,
    pub state: BackendState,
    #[serde(default)]
    pub state_reason: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::MEDIA;

    #[test]
    fn test_set_pools_stamps_backend_uuid() {
        let uuid = Uuid::new_v4();
        let mut backend = Backend {
            uuid,
            name: "nas-1".into(),
            driver_kind: "memory".into(),
            protocol: Protocol::File,
            state: BackendState::Online,
            state_reason: None,
            pools: BTreeMap::new(),
            config: BackendConfig::new("nas-1", "memory"),
            registered_at: Utc::now(),
        };

        backend.set_pools(vec![
            DiscoveredPool::new("aggr1").with_attribute(MEDIA, AttributeValue::string("ssd")),
            DiscoveredPool::new("aggr2").with_label("tier", "bronze"),
        ]);

        assert_eq!(backend.pools.len(), 2);
        assert!(backend.pools.values().all(|p| p.backend_uuid == uuid));
        assert_eq!(backend.pool("aggr2").unwrap().labels["tier"], "bronze");

        let record = backend.to_record();
        assert_eq!(record.name, "nas-1");
        assert_eq!(record.state, BackendState::Online);
    }
}
