//! In-memory store client
//!
//! Non-durable [`StoreClient`] used by tests and ephemeral deployments. An
//! availability switch lets tests simulate an unreachable store.

use crate::domain::{StoreClient, StoreResult};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Key/value store held entirely in memory
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    /// Is the store reachable
    available: AtomicBool,
    /// Successful mutations, for tests
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }

    fn not_found(key: &str) -> StoreError {
        StoreError::KeyNotFound {
            key: key.to_string(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn create(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(StoreError::KeyExists {
                key: key.to_string(),
            });
        }
        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<String> {
        self.check_available()?;
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(existing) => {
                *existing = value.to_string();
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Self::not_found(key)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        match self.entries.write().remove(key) {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Self::not_found(key)),
        }
    }

    async fn read_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let keys: Vec<String> = self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        if keys.is_empty() {
            return Err(Self::not_found(prefix));
        }
        Ok(keys)
    }

    async fn delete_keys(&self, prefix: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));

        if entries.len() == before {
            return Err(Self::not_found(prefix));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = InMemoryStore::new();

        store.create("/volume/v1", "one").await.unwrap();
        assert_eq!(store.read("/volume/v1").await.unwrap(), "one");

        assert_matches!(
            store.create("/volume/v1", "again").await,
            Err(StoreError::KeyExists { .. })
        );

        store.update("/volume/v1", "two").await.unwrap();
        assert_eq!(store.read("/volume/v1").await.unwrap(), "two");

        store.delete("/volume/v1").await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_absent_keys_are_distinguishable() {
        let store = InMemoryStore::new();

        assert_matches!(store.read("/x").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.update("/x", "v").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.delete("/x").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.read_keys("/x").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.delete_keys("/x").await, Err(StoreError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_prefix_operations() {
        let store = InMemoryStore::new();
        store.create("/snapshot/v1/a", "a").await.unwrap();
        store.create("/snapshot/v1/b", "b").await.unwrap();
        store.create("/snapshot/v2/a", "c").await.unwrap();
        store.create("/volume/v1", "v").await.unwrap();

        let keys = store.read_keys("/snapshot/v1/").await.unwrap();
        assert_eq!(keys, vec!["/snapshot/v1/a", "/snapshot/v1/b"]);

        store.delete_keys("/snapshot/").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryStore::new();
        store.set_available(false);

        assert_matches!(store.create("/k", "v").await, Err(StoreError::Unavailable(_)));
        assert_matches!(store.read_keys("/").await, Err(StoreError::Unavailable(_)));

        store.set_available(true);
        store.create("/k", "v").await.unwrap();
    }
}
