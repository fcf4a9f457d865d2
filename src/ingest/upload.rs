use super::{IngestionJob, IngestionQueue, QueueError, iso_timestamp};
use crate::memory::{ConversationMemory, MemoryError};
use crate::metrics::PipelineMetrics;
use crate::parser::{DocumentParser, ParseError, SourceKind};
use crate::status::StatusTracker;
use crate::storage::{
    BlobError, BlobStore, ConversationRef, Document, DocumentRepository, DocumentStatus,
    DocumentStoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Storage event announcing a new upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadNotification {
    /// URL-encoded blob key, `user/filename`.
    #[serde(rename = "bucketKey")]
    pub bucket_key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Errors raised while registering an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Key did not decode to `user/filename`.
    #[error("malformed upload key: {0}")]
    MalformedKey(String),
    /// Uploaded blob could not be read.
    #[error(transparent)]
    Download(#[from] BlobError),
    /// Uploaded blob is not a readable document.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Document record could not be written.
    #[error(transparent)]
    Record(#[from] DocumentStoreError),
    /// Conversation session could not be created.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Job could not be enqueued.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Blocking page count task panicked or was cancelled.
    #[error("page count task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Turns upload notifications into document records and queued ingestion jobs.
pub struct UploadHandler {
    blobs: Arc<dyn BlobStore>,
    parser: DocumentParser,
    documents: Arc<dyn DocumentRepository>,
    memory: Arc<ConversationMemory>,
    queue: Arc<dyn IngestionQueue>,
    status: StatusTracker,
    metrics: Arc<PipelineMetrics>,
}

impl UploadHandler {
    /// Assemble a handler from its collaborators.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        parser: DocumentParser,
        documents: Arc<dyn DocumentRepository>,
        memory: Arc<ConversationMemory>,
        queue: Arc<dyn IngestionQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            blobs,
            parser,
            status: StatusTracker::new(documents.clone()),
            documents,
            memory,
            queue,
            metrics,
        }
    }

    /// Register one upload: record it as `UPLOADED`, open its first conversation, enqueue it.
    ///
    /// If the session or the job cannot be created once the record exists, the record is marked
    /// `FAILED` before the error is returned.
    pub async fn handle(&self, notification: UploadNotification) -> Result<Document, UploadError> {
        let key = decode_key(&notification.bucket_key)?;
        let (user_id, filename) = split_key(&key)?;

        let bytes = self.blobs.get(&key).await?;
        let parser = self.parser.clone();
        let kind = SourceKind::from_key(&key);
        let source_name = filename.to_string();
        let pages =
            tokio::task::spawn_blocking(move || parser.count_pages(&bytes, kind, &source_name))
                .await??;

        let created = iso_timestamp();
        let document = Document {
            user_id: user_id.to_string(),
            document_id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            created: created.clone(),
            pages,
            filesize: notification.size,
            status: DocumentStatus::Uploaded,
            conversations: vec![ConversationRef {
                conversation_id: uuid::Uuid::new_v4().to_string(),
                created,
            }],
        };

        self.documents.put(document.clone()).await?;
        if let Err(error) = self.open_and_enqueue(&document, &key).await {
            tracing::error!(
                user = %document.user_id,
                document = %document.document_id,
                error = %error,
                "Upload could not be queued"
            );
            if let Err(status_error) = self
                .status
                .set_status(&document.user_id, &document.document_id, DocumentStatus::Failed)
                .await
            {
                tracing::warn!(error = %status_error, "Failed to record FAILED status");
            }
            return Err(error);
        }

        self.metrics.record_upload();
        tracing::info!(
            user = %document.user_id,
            document = %document.document_id,
            file = %document.filename,
            pages,
            status = %document.status,
            "Upload registered"
        );
        Ok(document)
    }

    async fn open_and_enqueue(&self, document: &Document, key: &str) -> Result<(), UploadError> {
        for conversation in &document.conversations {
            self.memory
                .create_session(&conversation.conversation_id)
                .await?;
        }
        self.queue
            .enqueue(IngestionJob {
                document_id: document.document_id.clone(),
                key: key.to_string(),
                user: document.user_id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Handle every notification independently; one bad record never stops the rest.
    pub async fn handle_batch(
        &self,
        notifications: Vec<UploadNotification>,
    ) -> Vec<Result<Document, UploadError>> {
        let mut results = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let key = notification.bucket_key.clone();
            let result = self.handle(notification).await;
            if let Err(error) = &result {
                tracing::error!(key = %key, error = %error, "Failed to register upload");
            }
            results.push(result);
        }
        results
    }
}

fn decode_key(raw: &str) -> Result<String, UploadError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| UploadError::MalformedKey(raw.to_string()))
}

fn split_key(key: &str) -> Result<(&str, &str), UploadError> {
    match key.split_once('/') {
        Some((user, filename))
            if !user.is_empty() && !filename.is_empty() && !filename.contains('/') =>
        {
            Ok((user, filename))
        }
        _ => Err(UploadError::MalformedKey(key.to_string())),
    }
}
