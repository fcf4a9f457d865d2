use super::IngestionJob;
use crate::index::{EmbeddingError, IndexBuilder, IndexKey, IndexStore, IndexStoreError};
use crate::locks::KeyedLocks;
use crate::metrics::PipelineMetrics;
use crate::normalize::Normalizer;
use crate::parser::{DocumentParser, ParseError, SourceKind};
use crate::status::{StatusError, StatusTracker};
use crate::storage::{BlobError, BlobStore, DocumentStatus};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors that fail one ingestion attempt.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Job key does not name a blob in the job user's namespace.
    #[error("job key {key} does not belong to user {user}")]
    ForeignKey {
        /// Blob key from the job.
        key: String,
        /// User the job was submitted for.
        user: String,
    },
    /// Source blob could not be fetched.
    #[error("failed to download {key}: {source}")]
    Download {
        /// Blob key that was requested.
        key: String,
        /// Underlying storage failure.
        #[source]
        source: BlobError,
    },
    /// Source was unreadable or corrupt.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Provider failed to embed the normalized units.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Index artifacts could not be written.
    #[error(transparent)]
    Persist(#[from] IndexStoreError),
    /// Status record could not be updated.
    #[error(transparent)]
    Status(#[from] StatusError),
    /// Blocking parse task panicked or was cancelled.
    #[error("parse task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Summary of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Document record id.
    pub document_id: String,
    /// Owning user.
    pub user_id: String,
    /// Filename the index is keyed by.
    pub file_name: String,
    /// Units embedded into the index.
    pub units: usize,
}

/// Terminal result of one job, as reported by batch processing and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// Document record id.
    pub document_id: String,
    /// Owning user.
    pub user_id: String,
    /// `READY` or `FAILED`.
    pub status: DocumentStatus,
    /// Units indexed on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<usize>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    fn from_result(job: &IngestionJob, result: &Result<IngestReport, IngestError>) -> Self {
        match result {
            Ok(report) => Self {
                document_id: job.document_id.clone(),
                user_id: job.user.clone(),
                status: DocumentStatus::Ready,
                units: Some(report.units),
                error: None,
            },
            Err(error) => Self {
                document_id: job.document_id.clone(),
                user_id: job.user.clone(),
                status: DocumentStatus::Failed,
                units: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Drives one uploaded document through parse, normalize, embed, and persist.
pub struct IngestionPipeline {
    blobs: Arc<dyn BlobStore>,
    parser: DocumentParser,
    normalizer: Normalizer,
    builder: IndexBuilder,
    indexes: IndexStore,
    status: StatusTracker,
    metrics: Arc<PipelineMetrics>,
    runs: KeyedLocks,
}

impl IngestionPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        parser: DocumentParser,
        normalizer: Normalizer,
        builder: IndexBuilder,
        indexes: IndexStore,
        status: StatusTracker,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            blobs,
            parser,
            normalizer,
            builder,
            indexes,
            status,
            metrics,
            runs: KeyedLocks::new(),
        }
    }

    /// Run one job to a terminal status.
    ///
    /// On failure the document is marked `FAILED`, any index artifacts for it are discarded, and
    /// the original error is returned. Re-running a job rebuilds and overwrites the index.
    /// Runs targeting the same index wait for each other, so the last run to finish decides both
    /// the artifacts and the terminal status.
    pub async fn run(&self, job: IngestionJob) -> Result<IngestReport, IngestError> {
        let key = IndexKey::new(&job.user, job.file_name());
        let _run = self.runs.lock(&key.to_string()).await;
        tracing::info!(
            user = %job.user,
            document = %job.document_id,
            key = %job.key,
            "Ingestion started"
        );

        match self.ingest(&job, &key).await {
            Ok(report) => {
                self.metrics
                    .record_ready(report.units as u64, self.normalizer.chunk_size());
                tracing::info!(
                    user = %job.user,
                    document = %job.document_id,
                    units = report.units,
                    status = %DocumentStatus::Ready,
                    "Ingestion completed"
                );
                Ok(report)
            }
            Err(error) => {
                self.fail(&job, &key, &error).await;
                Err(error)
            }
        }
    }

    /// Run every job independently, in order, and report each terminal outcome.
    pub async fn process_batch(&self, jobs: Vec<IngestionJob>) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = self.run(job.clone()).await;
            outcomes.push(IngestOutcome::from_result(&job, &result));
        }
        outcomes
    }

    /// Run one job and fold the result into an [`IngestOutcome`].
    pub async fn run_to_outcome(&self, job: IngestionJob) -> IngestOutcome {
        let result = self.run(job.clone()).await;
        IngestOutcome::from_result(&job, &result)
    }

    async fn ingest(&self, job: &IngestionJob, key: &IndexKey) -> Result<IngestReport, IngestError> {
        if key.document.is_empty()
            || job.key.split_once('/') != Some((job.user.as_str(), key.document.as_str()))
        {
            return Err(IngestError::ForeignKey {
                key: job.key.clone(),
                user: job.user.clone(),
            });
        }

        self.status
            .set_status(&job.user, &job.document_id, DocumentStatus::Processing)
            .await?;

        let bytes = self
            .blobs
            .get(&job.key)
            .await
            .map_err(|source| IngestError::Download {
                key: job.key.clone(),
                source,
            })?;

        let parser = self.parser.clone();
        let kind = SourceKind::from_key(&job.key);
        let source_name = key.document.clone();
        let units =
            tokio::task::spawn_blocking(move || parser.parse(&bytes, kind, &source_name)).await??;
        let parsed = units.len();

        let units = self.normalizer.normalize(units);
        tracing::debug!(
            user = %job.user,
            document = %job.document_id,
            parsed,
            units = units.len(),
            "Prepared text units"
        );

        let index = self.builder.build(units).await?;
        self.indexes.save(key, &index).await?;

        self.status
            .set_status(&job.user, &job.document_id, DocumentStatus::Ready)
            .await?;

        Ok(IngestReport {
            document_id: job.document_id.clone(),
            user_id: job.user.clone(),
            file_name: key.document.clone(),
            units: index.len(),
        })
    }

    async fn fail(&self, job: &IngestionJob, key: &IndexKey, error: &IngestError) {
        tracing::error!(
            user = %job.user,
            document = %job.document_id,
            key = %job.key,
            error = %error,
            "Ingestion failed"
        );
        self.metrics.record_failed();

        if let Err(discard_error) = self.indexes.discard(key).await {
            tracing::warn!(
                user = %job.user,
                document = %job.document_id,
                error = %discard_error,
                "Failed to discard index artifacts"
            );
        }
        if let Err(status_error) = self
            .status
            .set_status(&job.user, &job.document_id, DocumentStatus::Failed)
            .await
        {
            tracing::warn!(
                user = %job.user,
                document = %job.document_id,
                error = %status_error,
                "Failed to record FAILED status"
            );
        }
    }
}
