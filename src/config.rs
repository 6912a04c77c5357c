//! Seed Configuration
//!
//! A YAML file listing backends and storage classes to register once the
//! engine has bootstrapped. Entries that already exist are left alone, so
//! the same file can be applied on every start.
//!
//! ```yaml
//! backends:
//!   - name: mem-1
//!     driver: memory
//!     config:
//!       protocol: file
//! storageClasses:
//!   - name: gold
//!     parameters:
//!       media: ssd
//! ```

use crate::controlplane::Orchestrator;
use crate::error::{Error, Result};
use crate::storage::BackendConfig;
use crate::storage_class::StorageClassConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// A storage class, either fully structured or as platform parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageClassSeed {
    Parameters {
        name: String,
        parameters: BTreeMap<String, String>,
    },
    Structured(StorageClassConfig),
}

impl StorageClassSeed {
    pub fn name(&self) -> &str {
        match self {
            StorageClassSeed::Parameters { name, .. } => name,
            StorageClassSeed::Structured(config) => &config.name,
        }
    }

    pub fn to_config(&self) -> Result<StorageClassConfig> {
        match self {
            StorageClassSeed::Parameters { name, parameters } => {
                StorageClassConfig::from_parameters(name, parameters)
            }
            StorageClassSeed::Structured(config) => Ok(config.clone()),
        }
    }
}

/// Backends and storage classes to register at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeedConfig {
    pub backends: Vec<BackendConfig>,
    pub storage_classes: Vec<StorageClassSeed>,
}

/// What applying a seed changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub backends_added: usize,
    pub storage_classes_added: usize,
    pub skipped: usize,
}

impl SeedConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("invalid seed file: {}", e)))
    }

    /// Read a seed file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let seed = Self::from_yaml(&contents)?;
        info!(
            "Loaded seed file {}: {} backend(s), {} storage class(es)",
            path.display(),
            seed.backends.len(),
            seed.storage_classes.len()
        );
        Ok(seed)
    }

    /// Register every entry not already known to the orchestrator
    pub async fn apply(&self, orchestrator: &Orchestrator) -> Result<SeedSummary> {
        let mut summary = SeedSummary::default();

        for backend in &self.backends {
            if orchestrator.get_backend(&backend.name).is_ok() {
                debug!("Seed backend {} already registered", backend.name);
                summary.skipped += 1;
                continue;
            }
            orchestrator.add_backend(backend.clone()).await?;
            summary.backends_added += 1;
        }

        for class in &self.storage_classes {
            if orchestrator.get_storage_class(class.name()).is_ok() {
                debug!("Seed storage class {} already registered", class.name());
                summary.skipped += 1;
                continue;
            }
            orchestrator.add_storage_class(class.to_config()?).await?;
            summary.storage_classes_added += 1;
        }

        info!(
            "Applied seed: {} backend(s), {} storage class(es) added, {} skipped",
            summary.backends_added, summary.storage_classes_added, summary.skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeRequest, MEDIA};
    use crate::controlplane::{BackendFactory, OrchestratorConfig};
    use crate::persistence::InMemoryStore;
    use crate::storage::BackendState;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const SEED: &str = r#"
backends:
  - name: mem-fast
    driver: memory
    config:
      protocol: block
      pools:
        - name: ssd
          attributes:
            media: { type: string, value: ssd }
  - name: mem-bulk
    driver: memory
storageClasses:
  - name: fast
    parameters:
      media: ssd
      fsType: ext4
  - name: anywhere
    exclude_pools: {}
"#;

    #[test]
    fn test_parse_seed() {
        let seed = SeedConfig::from_yaml(SEED).unwrap();

        assert_eq!(seed.backends.len(), 2);
        assert_eq!(seed.backends[0].config["protocol"], "block");
        assert!(seed.backends[1].config.is_null());

        assert_matches!(
            &seed.storage_classes[0],
            StorageClassSeed::Parameters { name, .. } if name == "fast"
        );
        assert_matches!(
            &seed.storage_classes[1],
            StorageClassSeed::Structured(c) if c.name == "anywhere"
        );

        let fast = seed.storage_classes[0].to_config().unwrap();
        assert_eq!(
            fast.attributes.get(MEDIA),
            Some(&AttributeRequest::String("ssd".to_string()))
        );
    }

    #[test]
    fn test_invalid_seed() {
        assert_matches!(
            SeedConfig::from_yaml("backends: 12"),
            Err(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_apply_seed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.yaml");
        std::fs::write(&path, SEED).unwrap();

        let orch = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(InMemoryStore::new()),
            BackendFactory::with_defaults(),
        )
        .unwrap();
        orch.bootstrap().await.unwrap();

        let seed = SeedConfig::load(&path).await.unwrap();
        let summary = seed.apply(&orch).await.unwrap();
        assert_eq!(summary.backends_added, 2);
        assert_eq!(summary.storage_classes_added, 2);
        assert_eq!(
            orch.get_backend("mem-fast").unwrap().state,
            BackendState::Online
        );

        // Only the ssd pool of mem-fast offers media=ssd
        let pools = orch.storage_class_pools("fast").unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].backend_name, "mem-fast");

        let again = seed.apply(&orch).await.unwrap();
        assert_eq!(again.skipped, 4);
        assert_eq!(again.backends_added, 0);
    }
}
