//! Document lifecycle tracking.
//!
//! `UPLOADED → PROCESSING → READY | FAILED`. The tracker is the only writer of the status
//! field; every write is an unconditional overwrite keyed by (user id, document id), so repeated
//! writes of the same status are harmless and duplicate ingestion attempts converge.

use crate::storage::{DocumentRepository, DocumentStatus, DocumentStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while updating a document's status.
#[derive(Debug, Error)]
#[error("failed to set status {status} for document {document_id} of user {user_id}: {source}")]
pub struct StatusError {
    /// Owning user.
    pub user_id: String,
    /// Document identifier.
    pub document_id: String,
    /// Status that could not be written.
    pub status: DocumentStatus,
    /// Underlying store failure.
    #[source]
    pub source: DocumentStoreError,
}

/// Writes document lifecycle transitions to the record store.
#[derive(Clone)]
pub struct StatusTracker {
    documents: Arc<dyn DocumentRepository>,
}

impl StatusTracker {
    /// Track statuses in `documents`.
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }

    /// Overwrite the status of (user, document).
    pub async fn set_status(
        &self,
        user_id: &str,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StatusError> {
        self.documents
            .update_status(user_id, document_id, status)
            .await
            .map_err(|source| StatusError {
                user_id: user_id.to_string(),
                document_id: document_id.to_string(),
                status,
                source,
            })?;
        tracing::info!(user = user_id, document = document_id, status = %status, "Document status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Document, MemoryDocumentRepository};

    async fn tracker_with_document() -> (StatusTracker, Arc<MemoryDocumentRepository>) {
        let repository = Arc::new(MemoryDocumentRepository::new());
        repository
            .put(Document {
                user_id: "alice".into(),
                document_id: "doc-1".into(),
                filename: "report.pdf".into(),
                created: "2024-01-01T00:00:00.000000Z".into(),
                pages: 1,
                filesize: 10,
                status: DocumentStatus::Uploaded,
                conversations: Vec::new(),
            })
            .await
            .expect("put");
        (StatusTracker::new(repository.clone()), repository)
    }

    #[tokio::test]
    async fn set_status_is_idempotent() {
        let (tracker, repository) = tracker_with_document().await;
        for status in [
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Ready,
        ] {
            tracker
                .set_status("alice", "doc-1", status)
                .await
                .expect("status");
        }

        let document = repository
            .get("alice", "doc-1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(document.status, DocumentStatus::Ready);
    }

    #[tokio::test]
    async fn unknown_documents_are_reported_with_context() {
        let (tracker, _) = tracker_with_document().await;
        let error = tracker
            .set_status("alice", "ghost", DocumentStatus::Failed)
            .await
            .unwrap_err();
        assert_eq!(error.document_id, "ghost");
        assert_eq!(error.status, DocumentStatus::Failed);
        assert!(matches!(error.source, DocumentStoreError::NotFound { .. }));
    }
}
