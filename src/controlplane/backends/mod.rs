//! Storage Backend Drivers
//!
//! Provides driver construction by kind:
//! - memory: in-process reference driver

pub mod memory;

pub use memory::*;

use crate::domain::ports::StorageDriverRef;
use crate::error::{Error, Result};
use crate::storage::BackendConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a driver for a backend registration
pub type DriverConstructor = Arc<dyn Fn(&BackendConfig) -> Result<StorageDriverRef> + Send + Sync>;

/// Factory for creating storage drivers by kind
#[derive(Clone)]
pub struct BackendFactory {
    constructors: BTreeMap<String, DriverConstructor>,
}

impl BackendFactory {
    /// Create a factory with no drivers registered
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Create a factory with the built-in drivers registered
    pub fn with_defaults() -> Self {
        Self::empty().with_driver(MEMORY_DRIVER, |config| {
            Ok(Arc::new(MemoryDriver::from_backend_config(config)?) as StorageDriverRef)
        })
    }

    /// Register (or replace) the constructor for a driver kind
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&BackendConfig) -> Result<StorageDriverRef> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.to_lowercase(), Arc::new(constructor));
    }

    pub fn with_driver<F>(mut self, kind: &str, constructor: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<StorageDriverRef> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Create a driver for a backend registration
    pub fn create(&self, config: &BackendConfig) -> Result<StorageDriverRef> {
        match self.constructors.get(&config.driver.to_lowercase()) {
            Some(constructor) => constructor(config),
            None => Err(Error::Configuration(format!(
                "unknown driver kind '{}' for backend {}",
                config.driver, config.name
            ))),
        }
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for BackendFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_create_by_kind() {
        let factory = BackendFactory::with_defaults();
        assert_eq!(factory.kinds(), vec!["memory"]);

        let driver = factory
            .create(&BackendConfig::new("nas-1", "Memory"))
            .unwrap();
        assert_eq!(driver.kind(), MEMORY_DRIVER);

        assert_matches!(
            factory.create(&BackendConfig::new("nas-2", "ontap-nas")).map(|_| ()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_register_shared_driver() {
        let shared = Arc::new(MemoryDriver::new("nas-1", MemoryDriverConfig::default()));
        let handle = shared.clone();
        let factory = BackendFactory::empty()
            .with_driver("memory", move |_| Ok(handle.clone() as StorageDriverRef));

        let config = BackendConfig::new("nas-1", "memory");
        let driver = factory.create(&config).unwrap();
        tokio_test::block_on(driver.initialize(&config)).unwrap();

        // Calls through the factory-built handle reach the shared driver
        assert_eq!(shared.call_count(crate::domain::DriverOperation::Initialize), 1);
    }
}
