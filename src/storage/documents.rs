//! Document record table.

use super::{is_safe_segment, write_atomic};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Registered from an upload notification; ingestion not yet started.
    Uploaded,
    /// An ingestion attempt is running.
    Processing,
    /// A complete index is persisted.
    Ready,
    /// The latest ingestion attempt failed.
    Failed,
}

impl DocumentStatus {
    /// Wire representation used in records and API responses.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    /// Conversation session identifier.
    #[serde(rename = "conversationid")]
    pub conversation_id: String,
    /// ISO-8601 UTC creation timestamp.
    pub created: String,
}

/// Document record as stored in the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Owning user.
    #[serde(rename = "userid")]
    pub user_id: String,
    /// Identifier, unique per user.
    #[serde(rename = "documentid")]
    pub document_id: String,
    /// Original filename; also the index key within the user's namespace.
    pub filename: String,
    /// ISO-8601 UTC creation timestamp.
    pub created: String,
    /// Page count across all parsed sources.
    pub pages: u32,
    /// Size of the uploaded blob in bytes.
    pub filesize: u64,
    /// Lifecycle status.
    #[serde(rename = "docstatus")]
    pub status: DocumentStatus,
    /// Conversations opened against this document.
    pub conversations: Vec<ConversationRef>,
}

/// Errors returned by document record stores.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// No record exists for the (user, document) key.
    #[error("document {document_id} not found for user {user_id}")]
    NotFound {
        /// Owning user.
        user_id: String,
        /// Document identifier.
        document_id: String,
    },
    /// Key contained path-escaping segments.
    #[error("invalid document key: {0}")]
    InvalidKey(String),
    /// Underlying storage failed.
    #[error("document storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stored record could not be (de)serialized.
    #[error("document record is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value store of document records keyed by (user id, document id).
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert or replace a full record.
    async fn put(&self, document: Document) -> Result<(), DocumentStoreError>;

    /// Fetch a record, if present.
    async fn get(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, DocumentStoreError>;

    /// Overwrite only the status field of an existing record.
    async fn update_status(
        &self,
        user_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError>;

    /// List a user's documents ordered by creation time.
    async fn list(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError>;
}

fn not_found(user_id: &str, document_id: &str) -> DocumentStoreError {
    DocumentStoreError::NotFound {
        user_id: user_id.to_string(),
        document_id: document_id.to_string(),
    }
}

/// Record store held in process memory.
#[derive(Default)]
pub struct MemoryDocumentRepository {
    records: RwLock<HashMap<(String, String), Document>>,
}

impl MemoryDocumentRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn put(&self, document: Document) -> Result<(), DocumentStoreError> {
        let key = (document.user_id.clone(), document.document_id.clone());
        self.records.write().await.insert(key, document);
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let key = (user_id.to_string(), document_id.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn update_status(
        &self,
        user_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError> {
        let key = (user_id.to_string(), document_id.to_string());
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key)
            .ok_or_else(|| not_found(user_id, document_id))?;
        record.status = status;
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError> {
        let mut documents: Vec<Document> = self
            .records
            .read()
            .await
            .values()
            .filter(|document| document.user_id == user_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(documents)
    }
}

/// Record store writing one JSON file per document under `{root}/{user}/{document}.json`.
pub struct FsDocumentRepository {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsDocumentRepository {
    /// Store records beneath `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf, DocumentStoreError> {
        if !is_safe_segment(user_id) || user_id.contains('/') {
            return Err(DocumentStoreError::InvalidKey(user_id.to_string()));
        }
        Ok(self.root.join(user_id))
    }

    fn record_path(&self, user_id: &str, document_id: &str) -> Result<PathBuf, DocumentStoreError> {
        if !is_safe_segment(document_id) || document_id.contains('/') {
            return Err(DocumentStoreError::InvalidKey(document_id.to_string()));
        }
        Ok(self.user_dir(user_id)?.join(format!("{document_id}.json")))
    }

    async fn read_record(&self, path: &PathBuf) -> Result<Option<Document>, DocumentStoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_record(&self, document: &Document) -> Result<(), DocumentStoreError> {
        let path = self.record_path(&document.user_id, &document.document_id)?;
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for FsDocumentRepository {
    async fn put(&self, document: Document) -> Result<(), DocumentStoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_record(&document).await
    }

    async fn get(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let path = self.record_path(user_id, document_id)?;
        self.read_record(&path).await
    }

    async fn update_status(
        &self,
        user_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(user_id, document_id)?;
        let mut document = self
            .read_record(&path)
            .await?
            .ok_or_else(|| not_found(user_id, document_id))?;
        document.status = status;
        self.write_record(&document).await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError> {
        let dir = self.user_dir(user_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(document) = self.read_record(&path).await? {
                documents.push(document);
            }
        }
        documents.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(documents)
    }
}
