//! Object storage for uploaded PDF bytes.

use super::{is_safe_segment, write_atomic};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors returned by object storage adapters.
#[derive(Debug, Error)]
pub enum BlobError {
    /// No object exists under the requested key.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// Key contained empty or path-escaping segments.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    /// Underlying storage failed.
    #[error("blob storage I/O failed for {key}: {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Durable object storage keyed by `/`-separated paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full object stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    /// Remove the object under `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.split('/').all(is_safe_segment) {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

/// Object storage backed by a directory tree.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Store objects beneath `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| {
            path.join(segment)
        }))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(source) => Err(BlobError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|source| BlobError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Object storage held in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trips_and_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());

        store
            .put("alice/report.pdf", b"%PDF".to_vec())
            .await
            .expect("put");
        assert_eq!(store.get("alice/report.pdf").await.expect("get"), b"%PDF");

        store.delete("alice/report.pdf").await.expect("delete");
        store.delete("alice/report.pdf").await.expect("second delete");
        assert!(matches!(
            store.get("alice/report.pdf").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());
        let error = store.get("alice/../bob/secret").await.unwrap_err();
        assert!(matches!(error, BlobError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn memory_store_reports_missing_objects() {
        let store = MemoryBlobStore::new();
        assert!(matches!(store.get("a/b").await, Err(BlobError::NotFound(_))));

        store.put("a/b", vec![1, 2]).await.expect("put");
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("a/b").await.expect("get"), vec![1, 2]);
    }
}
