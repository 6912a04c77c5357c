//! Storage class definitions

use crate::attribute::{
    self, AttributeRequest, PoolSet, ADDITIONAL_STORAGE_POOLS, EXCLUDE_STORAGE_POOLS,
    IGNORED_PARAMETERS, REQUIRED_STORAGE, RESERVED_PARAMETER_PREFIX, STORAGE_POOLS,
};
use crate::error::Result;
use crate::storage::validate_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named placement policy: attribute requests plus pool lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClassConfig {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeRequest>,
    /// When non-empty, only these pools are eligible
    #[serde(default)]
    pub pools: PoolSet,
    /// Always eligible, regardless of attributes
    #[serde(default)]
    pub additional_pools: PoolSet,
    /// Never eligible
    #[serde(default)]
    pub exclude_pools: PoolSet,
}

impl StorageClassConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            pools: PoolSet::new(),
            additional_pools: PoolSet::new(),
            exclude_pools: PoolSet::new(),
        }
    }

    /// Build a class from platform storage-class parameters.
    ///
    /// Pool-list keys are decoded; every other key must be a recognised
    /// attribute. Platform-reserved keys are skipped.
    pub fn from_parameters(name: &str, parameters: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::new(name);

        for (key, value) in parameters {
            match key.as_str() {
                STORAGE_POOLS => config.pools = PoolSet::parse(value)?,
                ADDITIONAL_STORAGE_POOLS | REQUIRED_STORAGE => {
                    for (backend, pool) in PoolSet::parse(value)?.iter() {
                        config.additional_pools.insert(backend, pool);
                    }
                }
                EXCLUDE_STORAGE_POOLS => config.exclude_pools = PoolSet::parse(value)?,
                k if IGNORED_PARAMETERS.contains(&k)
                    || k.starts_with(RESERVED_PARAMETER_PREFIX) => {}
                _ => {
                    let request = AttributeRequest::parse(key, value)?;
                    config.attributes.insert(key.clone(), request);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, request: AttributeRequest) -> Self {
        self.attributes.insert(name.into(), request);
        self
    }

    pub fn with_pools(mut self, pools: PoolSet) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_additional_pools(mut self, pools: PoolSet) -> Self {
        self.additional_pools = pools;
        self
    }

    pub fn with_exclude_pools(mut self, pools: PoolSet) -> Self {
        self.exclude_pools = pools;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("storage class", &self.name)?;
        for name in self.attributes.keys() {
            if attribute::attribute_kind(name).is_none() {
                return Err(crate::error::Error::InvalidArgument(format!(
                    "storage class {} requests unrecognized attribute {}",
                    self.name, name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{IOPS, MEDIA, SELECTOR};
    use crate::error::Error;
    use assert_matches::assert_matches;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_parameters() {
        let config = StorageClassConfig::from_parameters(
            "gold",
            &params(&[
                ("media", "ssd"),
                ("IOPS", "5000"),
                ("selector", "tier=gold"),
                ("storagePools", "nas-1:aggr1,aggr2"),
                ("additionalStoragePools", "nas-2:aggr9"),
                ("requiredStorage", "nas-3:aggr1"),
                ("excludeStoragePools", "nas-1:aggr2"),
                ("fsType", "ext4"),
                ("csi.storage.k8s.io/fstype", "xfs"),
            ]),
        )
        .unwrap();

        assert_eq!(config.attributes.len(), 3);
        assert_eq!(config.attributes[MEDIA], AttributeRequest::String("ssd".into()));
        assert_eq!(config.attributes[IOPS], AttributeRequest::Int(5000));
        assert_matches!(config.attributes[SELECTOR], AttributeRequest::Selector(_));
        assert_eq!(config.pools.len(), 2);
        assert!(config.additional_pools.contains("nas-2", "aggr9"));
        assert!(config.additional_pools.contains("nas-3", "aggr1"));
        assert!(config.exclude_pools.contains("nas-1", "aggr2"));
    }

    #[test]
    fn test_rejects_unknown_attribute() {
        let result = StorageClassConfig::from_parameters("gold", &params(&[("colour", "blue")]));
        assert_matches!(result, Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_malformed_pool_list() {
        let result =
            StorageClassConfig::from_parameters("gold", &params(&[("storagePools", "nas-1")]));
        assert_matches!(result, Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = StorageClassConfig::from_parameters(
            "silver",
            &params(&[("selector", "a=b; c=d"), ("encryption", "true")]),
        )
        .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: StorageClassConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
