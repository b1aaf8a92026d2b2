//! In-memory object storage for local runs and tests.

use crate::{ObjectStorage, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory key/value store implementing [`ObjectStorage`].
///
/// Cloning shares the underlying map, so a test can hold one handle while
/// the pipeline writes through another. Writes can be made to fail for keys
/// containing a given fragment, which is how the no-partial-job guarantees
/// are exercised without a real backend.
#[derive(Clone, Default)]
pub struct MemoryObjectStorage {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    failing_put_fragments: Arc<RwLock<Vec<String>>>,
}

impl MemoryObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store_file` whose key contains `fragment` fail
    pub async fn fail_puts_containing(&self, fragment: &str) {
        self.failing_put_fragments
            .write()
            .await
            .push(fragment.to_string());
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn store_file(&self, key: &str, data: &[u8]) -> StorageResult<String> {
        for fragment in self.failing_put_fragments.read().await.iter() {
            if key.contains(fragment.as_str()) {
                return Err(StorageError::Other(format!(
                    "injected write failure for key '{key}'"
                )));
            }
        }
        debug!("memory store: put {} ({} bytes)", key, data.len());
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(key.to_string())
    }

    async fn retrieve_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let storage = MemoryObjectStorage::new();
        storage.store_file("temp/a/file.pdf", b"data").await.unwrap();
        assert_eq!(storage.retrieve_file("temp/a/file.pdf").await.unwrap(), b"data");
        assert!(storage.file_exists("temp/a/file.pdf").await.unwrap());
        assert!(!storage.file_exists("temp/a/other.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let storage = MemoryObjectStorage::new();
        let err = storage.retrieve_file("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_files_by_prefix() {
        let storage = MemoryObjectStorage::new();
        storage.store_file("temp/a/1", b"1").await.unwrap();
        storage.store_file("temp/a/2", b"2").await.unwrap();
        storage.store_file("temp/b/3", b"3").await.unwrap();
        let keys = storage.list_files("temp/a/").await.unwrap();
        assert_eq!(keys, vec!["temp/a/1".to_string(), "temp/a/2".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_put_failure() {
        let storage = MemoryObjectStorage::new();
        storage.fail_puts_containing("chunk_2").await;
        storage.store_file("temp/f/f_chunk_1.pdf", b"ok").await.unwrap();
        let err = storage
            .store_file("temp/f/f_chunk_2.pdf", b"no")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Other(_)));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let storage = MemoryObjectStorage::new();
        storage.store_file("k", b"v").await.unwrap();
        storage.delete_file("k").await.unwrap();
        assert!(!storage.file_exists("k").await.unwrap());
        assert!(storage.is_empty().await);
    }
}
