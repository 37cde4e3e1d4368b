use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::util::random_string;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("delete failed: {0}")]
    Delete(String),
}

/// Represents a type that can store binary blobs and hand back stable URLs.
///
/// Marker photos live under `markers/<markerId>/…` and story photos under
/// `stories/<markerId>/…`. Deletion takes the URL returned by `put`, so the
/// caller never needs to know the backend's key layout.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, folder: &str, file_name: &str, bytes: Vec<u8>)
        -> Result<String, StorageError>;
    async fn delete(&self, url: &str) -> Result<(), StorageError>;
}

/// Stores objects on the local filesystem under a base directory. The
/// production deployment swaps in the S3-backed implementation behind the
/// same trait.
pub struct LocalStorage {
    base_dir: std::path::PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<std::path::PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let key = format!("{}/{}-{}", folder, random_string(8), file_name);
        let path = self.base_dir.join(&key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Upload(e.to_string()))?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let key = url
            .strip_prefix(&self.base_url)
            .map(|k| k.trim_start_matches('/'))
            .ok_or_else(|| StorageError::Delete(format!("foreign url {url}")))?;

        tokio::fs::remove_file(self.base_dir.join(key))
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))
    }
}

/// An in-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Default::default(),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().contains_key(url)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        // A random segment keeps same-named uploads from clobbering each other.
        let url = format!(
            "{}/{}/{}-{}",
            self.base_url,
            folder,
            random_string(8),
            file_name
        );

        self.objects.lock().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| StorageError::Delete(format!("no object at {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_delete() {
        let storage = MemoryStorage::new("http://storage.test");

        let url = storage
            .put("markers/5", "p1.jpg", vec![1, 2, 3])
            .await
            .expect("upload succeeds");

        assert!(url.starts_with("http://storage.test/markers/5/"));
        assert!(url.ends_with("p1.jpg"));
        assert!(storage.contains(&url));

        storage.delete(&url).await.expect("delete succeeds");
        assert!(!storage.contains(&url));
    }

    #[tokio::test]
    async fn test_delete_unknown_url_errors() {
        let storage = MemoryStorage::new("http://storage.test");

        let result = storage.delete("http://storage.test/none").await;
        assert!(result.is_err());
    }
}
