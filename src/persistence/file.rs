//! File-backed store client
//!
//! Each key is one file under the root directory, named by the
//! percent-encoded key. Writes go to a temporary file first and are then
//! linked or renamed into place, so a crash never leaves a half-written
//! value behind.

use crate::domain::{StoreClient, StoreResult};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_PREFIX: &str = ".tmp-";

// =============================================================================
// File Store Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding one file per key
    pub root_path: PathBuf,
    /// Whether to fsync each write before it becomes visible
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/storage-orchestrator"),
            sync_writes: true,
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

pub struct FileStore {
    root_path: PathBuf,
    /// Keys currently on disk
    index: RwLock<BTreeSet<String>>,
    sync_writes: bool,
}

impl FileStore {
    /// Open a store rooted at `root_path`, creating the directory if needed
    pub async fn open(root_path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_config(FileStoreConfig {
            root_path: root_path.into(),
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: FileStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let store = Self {
            root_path: config.root_path,
            index: RwLock::new(BTreeSet::new()),
            sync_writes: config.sync_writes,
        };
        store.rebuild_index().await?;

        Ok(store)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Scan the root directory, dropping leftover temporary files
    async fn rebuild_index(&self) -> StoreResult<()> {
        let mut keys = BTreeSet::new();

        let mut entries = fs::read_dir(&self.root_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            if file_name.starts_with(TEMP_PREFIX) {
                debug!("Removing stale temporary file {}", file_name);
                let _ = fs::remove_file(entry.path()).await;
                continue;
            }

            match urlencoding::decode(file_name) {
                Ok(key) => {
                    keys.insert(key.into_owned());
                }
                Err(e) => warn!("Ignoring undecodable store file {}: {}", file_name, e),
            }
        }

        *self.index.write() = keys;
        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_path.join(urlencoding::encode(key).as_ref())
    }

    /// Write `value` to a fresh temporary file
    async fn write_temp(&self, value: &str) -> StoreResult<PathBuf> {
        let temp_path = self
            .root_path
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(value.as_bytes()).await?;
        if self.sync_writes {
            file.sync_all().await?;
        }

        Ok(temp_path)
    }

    fn not_found(key: &str) -> StoreError {
        StoreError::KeyNotFound {
            key: key.to_string(),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.index
            .read()
            .range(prefix.to_string()..)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StoreClient for FileStore {
    async fn create(&self, key: &str, value: &str) -> StoreResult<()> {
        let temp_path = self.write_temp(value).await?;
        let result = fs::hard_link(&temp_path, self.key_path(key)).await;
        let _ = fs::remove_file(&temp_path).await;

        match result {
            Ok(()) => {
                self.index.write().insert(key.to_string());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::KeyExists {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &str) -> StoreResult<String> {
        match fs::read_to_string(self.key_path(key)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.key_path(key);
        if fs::metadata(&path).await.is_err() {
            return Err(Self::not_found(key));
        }

        let temp_path = self.write_temp(value).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => {
                self.index.write().remove(key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.index.write().remove(key);
                Err(Self::not_found(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let keys = self.keys_with_prefix(prefix);
        if keys.is_empty() {
            return Err(Self::not_found(prefix));
        }
        Ok(keys)
    }

    async fn delete_keys(&self, prefix: &str) -> StoreResult<()> {
        let keys = self.keys_with_prefix(prefix);
        if keys.is_empty() {
            return Err(Self::not_found(prefix));
        }

        for key in keys {
            match self.delete(&key).await {
                Ok(()) | Err(StoreError::KeyNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).await.unwrap();

        store.create("/backend/nas-1", "{}").await.unwrap();
        assert_eq!(store.read("/backend/nas-1").await.unwrap(), "{}");

        assert_matches!(
            store.create("/backend/nas-1", "{}").await,
            Err(StoreError::KeyExists { .. })
        );

        store.update("/backend/nas-1", r#"{"a":1}"#).await.unwrap();
        assert_eq!(store.read("/backend/nas-1").await.unwrap(), r#"{"a":1}"#);

        store.delete("/backend/nas-1").await.unwrap();
        assert_matches!(
            store.read("/backend/nas-1").await,
            Err(StoreError::KeyNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_absent_keys_are_distinguishable() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).await.unwrap();

        assert_matches!(store.update("/x", "v").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.delete("/x").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.read_keys("/x").await, Err(StoreError::KeyNotFound { .. }));
        assert_matches!(store.delete_keys("/x").await, Err(StoreError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileStore::open(temp_dir.path()).await.unwrap();
            store.create("/snapshot/v1/a", "1").await.unwrap();
            store.create("/snapshot/v1/b", "2").await.unwrap();
            store.create("/volume/v1", "3").await.unwrap();
        }

        // Simulate a write interrupted before it was linked into place
        std::fs::write(temp_dir.path().join(".tmp-interrupted"), "partial").unwrap();

        let store = FileStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(
            store.read_keys("/snapshot/").await.unwrap(),
            vec!["/snapshot/v1/a", "/snapshot/v1/b"]
        );
        assert!(!temp_dir.path().join(".tmp-interrupted").exists());

        store.delete_keys("/snapshot/v1/").await.unwrap();
        assert_eq!(store.read_keys("/").await.unwrap(), vec!["/volume/v1"]);
    }
}
