use super::{DistanceMetric, EmbeddingIndex, IndexKey};
use crate::locks::KeyedLocks;
use crate::parser::TextUnit;
use crate::storage::{BlobError, BlobStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const VECTORS_FILE: &str = "index.vectors";
const METADATA_FILE: &str = "index.meta.json";
const FORMAT_VERSION: u32 = 1;

/// Errors raised while saving or loading index artifacts.
#[derive(Debug, Error)]
pub enum IndexStoreError {
    /// No complete, consistent artifact pair exists for the key.
    #[error("no index for {key}: {reason}")]
    NotFound {
        /// Index key that was requested.
        key: IndexKey,
        /// Which check failed.
        reason: String,
    },
    /// Writing the artifact pair failed; nothing loadable was left behind.
    #[error("failed to persist index for {key}: {source}")]
    Persist {
        /// Index key being written.
        key: IndexKey,
        /// Underlying storage failure.
        #[source]
        source: BlobError,
    },
    /// Reading an artifact failed for a reason other than absence.
    #[error("failed to read index for {key}: {source}")]
    Read {
        /// Index key being read.
        key: IndexKey,
        /// Underlying storage failure.
        #[source]
        source: BlobError,
    },
    /// Artifact key contained unusable characters.
    #[error("invalid index key {0}")]
    InvalidKey(IndexKey),
}

/// Metadata sidecar; also acts as the commit marker for the vector blob.
#[derive(Debug, Serialize, Deserialize)]
struct IndexMetadata {
    format_version: u32,
    build_id: String,
    created: String,
    model: String,
    dimension: usize,
    metric: DistanceMetric,
    count: usize,
    vectors_sha256: String,
    entries: Vec<TextUnit>,
}

/// Persists [`EmbeddingIndex`] artifact pairs under `{prefix}/{user}/{document}/`.
///
/// Write order is vectors, then metadata. The metadata records a checksum of the vector blob,
/// so `load` only succeeds for a pair written by the same `save`. Saves, loads, and discards of
/// one key are serialized across all clones of a store.
#[derive(Clone)]
pub struct IndexStore {
    blobs: Arc<dyn BlobStore>,
    prefix: String,
    locks: KeyedLocks,
}

impl IndexStore {
    /// Store artifacts in `blobs` beneath `prefix`.
    pub fn new(blobs: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            prefix: prefix.into().trim_matches('/').to_string(),
            locks: KeyedLocks::new(),
        }
    }

    fn artifact_keys(&self, key: &IndexKey) -> Result<(String, String), IndexStoreError> {
        if key.user_id.contains('/') || key.document.contains('/') {
            return Err(IndexStoreError::InvalidKey(key.clone()));
        }
        let base = if self.prefix.is_empty() {
            format!("{}/{}", key.user_id, key.document)
        } else {
            format!("{}/{}/{}", self.prefix, key.user_id, key.document)
        };
        Ok((
            format!("{base}/{VECTORS_FILE}"),
            format!("{base}/{METADATA_FILE}"),
        ))
    }

    /// Persist both artifacts for `key`, replacing any previous pair.
    pub async fn save(&self, key: &IndexKey, index: &EmbeddingIndex) -> Result<(), IndexStoreError> {
        let (vectors_key, metadata_key) = self.artifact_keys(key)?;
        let vectors = encode_vectors(index.vectors());
        let metadata = IndexMetadata {
            format_version: FORMAT_VERSION,
            build_id: uuid::Uuid::new_v4().to_string(),
            created: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string()),
            model: index.model().to_string(),
            dimension: index.dimension(),
            metric: index.metric(),
            count: index.len(),
            vectors_sha256: hex::encode(Sha256::digest(&vectors)),
            entries: index.entries().to_vec(),
        };
        let metadata_bytes = serde_json::to_vec(&metadata).map_err(|error| {
            IndexStoreError::Persist {
                key: key.clone(),
                source: BlobError::Io {
                    key: metadata_key.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, error),
                },
            }
        })?;

        let _guard = self.locks.lock(&metadata_key).await;
        self.blobs
            .put(&vectors_key, vectors)
            .await
            .map_err(|source| IndexStoreError::Persist {
                key: key.clone(),
                source,
            })?;

        if let Err(source) = self.blobs.put(&metadata_key, metadata_bytes).await {
            if let Err(cleanup) = self.blobs.delete(&vectors_key).await {
                tracing::warn!(index = %key, error = %cleanup, "Failed to remove orphaned index vectors");
            }
            return Err(IndexStoreError::Persist {
                key: key.clone(),
                source,
            });
        }

        tracing::info!(
            index = %key,
            build_id = %metadata.build_id,
            entries = metadata.count,
            dimension = metadata.dimension,
            "Index persisted"
        );
        Ok(())
    }

    /// Load the artifact pair for `key`, verifying that both halves belong together.
    pub async fn load(&self, key: &IndexKey) -> Result<EmbeddingIndex, IndexStoreError> {
        let (vectors_key, metadata_key) = self.artifact_keys(key)?;
        let not_found = |reason: String| IndexStoreError::NotFound {
            key: key.clone(),
            reason,
        };

        let (metadata_bytes, vectors) = {
            let _guard = self.locks.lock(&metadata_key).await;
            (
                self.fetch(key, &metadata_key).await?,
                self.fetch(key, &vectors_key).await?,
            )
        };

        let metadata: IndexMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|error| not_found(format!("unreadable metadata: {error}")))?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(not_found(format!(
                "unsupported format version {}",
                metadata.format_version
            )));
        }
        if hex::encode(Sha256::digest(&vectors)) != metadata.vectors_sha256 {
            return Err(not_found("vector blob does not match metadata".into()));
        }
        if metadata.entries.len() != metadata.count {
            return Err(not_found("entry count does not match metadata".into()));
        }

        let values = decode_vectors(&vectors)
            .ok_or_else(|| not_found("vector blob is truncated".into()))?;
        EmbeddingIndex::from_parts(metadata.model, metadata.dimension, metadata.entries, values)
            .ok_or_else(|| not_found("vector blob size does not match entry count".into()))
    }

    /// Remove both artifacts for `key`. Missing artifacts are ignored.
    pub async fn discard(&self, key: &IndexKey) -> Result<(), IndexStoreError> {
        let (vectors_key, metadata_key) = self.artifact_keys(key)?;
        let _guard = self.locks.lock(&metadata_key).await;
        for artifact in [metadata_key.as_str(), vectors_key.as_str()] {
            self.blobs
                .delete(artifact)
                .await
                .map_err(|source| IndexStoreError::Persist {
                    key: key.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn fetch(&self, key: &IndexKey, artifact: &str) -> Result<Vec<u8>, IndexStoreError> {
        match self.blobs.get(artifact).await {
            Ok(bytes) => Ok(bytes),
            Err(BlobError::NotFound(_)) => Err(IndexStoreError::NotFound {
                key: key.clone(),
                reason: format!("missing artifact {artifact}"),
            }),
            Err(BlobError::InvalidKey(_)) => Err(IndexStoreError::InvalidKey(key.clone())),
            Err(source) => Err(IndexStoreError::Read {
                key: key.clone(),
                source,
            }),
        }
    }
}

fn encode_vectors(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_vectors(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
