//! Document service wiring uploads, ingestion, and answering behind one façade.

use crate::{
    answer::{Answer, AnswerEngine, AnswerError, AnswerOptions, QueryRequest},
    completion::{CompletionClient, CompletionClientError, get_completion_client},
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, get_embedding_client},
    index::{IndexBuilder, IndexStore},
    ingest::{
        ChannelQueue, IngestOutcome, IngestionJob, IngestionPipeline, IngestionQueue,
        IngestionWorker, UploadError, UploadHandler, UploadNotification,
    },
    memory::{ConversationMemory, ConversationStore, FsConversationStore},
    metrics::{MetricsSnapshot, PipelineMetrics},
    normalize::{ChunkingError, Normalizer},
    parser::DocumentParser,
    status::StatusTracker,
    storage::{
        BlobStore, Document, DocumentRepository, DocumentStoreError, FsBlobStore,
        FsDocumentRepository,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

const QUEUE_CAPACITY: usize = 256;

/// Errors raised while constructing the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Embedding provider could not be configured.
    #[error("failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Completion provider could not be configured.
    #[error("failed to initialize completion client: {0}")]
    Completion(#[from] CompletionClientError),
    /// Tokenizer for the token budget could not be loaded.
    #[error("failed to initialize text normalizer: {0}")]
    Normalizer(#[from] ChunkingError),
}

/// Abstraction over the document service used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Register an uploaded blob and queue it for ingestion.
    async fn register_upload(
        &self,
        notification: UploadNotification,
    ) -> Result<Document, UploadError>;

    /// Register several uploads; each succeeds or fails on its own.
    async fn register_uploads(
        &self,
        notifications: Vec<UploadNotification>,
    ) -> Vec<Result<Document, UploadError>>;

    /// Run one ingestion job to a terminal status.
    async fn ingest(&self, job: IngestionJob) -> IngestOutcome;

    /// Run several ingestion jobs; each reaches its own terminal status.
    async fn ingest_batch(&self, jobs: Vec<IngestionJob>) -> Vec<IngestOutcome>;

    /// Answer a question about a ready document.
    async fn answer(&self, request: QueryRequest) -> Result<Answer, AnswerError>;

    /// Fetch a document record.
    async fn document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, DocumentStoreError>;

    /// List a user's document records, oldest first.
    async fn documents(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Long-lived collaborators the service is assembled from.
pub struct Components {
    /// Raw uploads and index artifacts.
    pub blobs: Arc<dyn BlobStore>,
    /// Document records.
    pub documents: Arc<dyn DocumentRepository>,
    /// Conversation histories.
    pub conversations: Arc<dyn ConversationStore>,
    /// Embedding provider used at build and query time.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Completion provider used for answers.
    pub completion: Arc<dyn CompletionClient>,
    /// Document parser.
    pub parser: DocumentParser,
    /// Text normalizer.
    pub normalizer: Normalizer,
}

/// Tunables that do not select a backend.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Blob prefix for index artifacts.
    pub index_prefix: String,
    /// Texts per embedding request.
    pub embedding_batch_size: usize,
    /// Retrieval and completion options.
    pub answer: AnswerOptions,
}

impl Settings {
    /// Read the tunables from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            index_prefix: config.index_prefix.clone(),
            embedding_batch_size: config.embedding_batch_size,
            answer: AnswerOptions {
                top_k: config.retrieval_top_k,
                score_threshold: config.retrieval_score_threshold,
                completion_model: config.completion_model.clone(),
                temperature: config.completion_temperature,
            },
        }
    }
}

/// Coordinates upload registration, ingestion, and answering.
///
/// Construct once near process start and share through an `Arc`; every collaborator is
/// itself shared, so the HTTP surface and the background worker see the same stores.
pub struct DocumentService {
    uploads: UploadHandler,
    pipeline: Arc<IngestionPipeline>,
    engine: AnswerEngine,
    documents: Arc<dyn DocumentRepository>,
    metrics: Arc<PipelineMetrics>,
}

impl DocumentService {
    /// Assemble the service; registered uploads are sent to `queue`.
    pub fn new(
        components: Components,
        settings: Settings,
        queue: Arc<dyn IngestionQueue>,
    ) -> Self {
        let Components {
            blobs,
            documents,
            conversations,
            embedder,
            completion,
            parser,
            normalizer,
        } = components;
        let metrics = Arc::new(PipelineMetrics::new());
        let memory = Arc::new(ConversationMemory::new(conversations));
        let indexes = IndexStore::new(blobs.clone(), settings.index_prefix);

        let pipeline = Arc::new(IngestionPipeline::new(
            blobs.clone(),
            parser.clone(),
            normalizer,
            IndexBuilder::new(embedder.clone(), settings.embedding_batch_size),
            indexes.clone(),
            StatusTracker::new(documents.clone()),
            metrics.clone(),
        ));
        let uploads = UploadHandler::new(
            blobs,
            parser,
            documents.clone(),
            memory.clone(),
            queue,
            metrics.clone(),
        );
        let engine = AnswerEngine::new(
            indexes,
            embedder,
            completion,
            memory,
            settings.answer,
            metrics.clone(),
        );

        Self {
            uploads,
            pipeline,
            engine,
            documents,
            metrics,
        }
    }

    /// Build the filesystem-backed service and its ingestion worker from configuration.
    pub fn from_config(config: &Config) -> Result<(Self, IngestionWorker), ServiceInitError> {
        tracing::info!(provider = ?config.embedding_provider, "Initializing embedding client");
        let embedder: Arc<dyn EmbeddingClient> = Arc::from(get_embedding_client(config)?);
        tracing::info!(provider = ?config.completion_provider, "Initializing completion client");
        let completion: Arc<dyn CompletionClient> = Arc::from(get_completion_client(config)?);

        let components = Components {
            blobs: Arc::new(FsBlobStore::new(config.blob_root())),
            documents: Arc::new(FsDocumentRepository::new(config.documents_root())),
            conversations: Arc::new(FsConversationStore::new(config.conversations_root())),
            embedder,
            completion,
            parser: DocumentParser::from_config(config),
            normalizer: Normalizer::from_config(config)?,
        };
        let (queue, receiver) = ChannelQueue::new(QUEUE_CAPACITY);
        let service = Self::new(components, Settings::from_config(config), Arc::new(queue));
        let worker = IngestionWorker::new(
            service.pipeline.clone(),
            receiver,
            config.ingest_concurrency,
        );
        tracing::info!(data_dir = %config.data_dir.display(), "Document service ready");
        Ok((service, worker))
    }

    /// Pipeline shared with the background worker.
    pub fn pipeline(&self) -> Arc<IngestionPipeline> {
        self.pipeline.clone()
    }
}

#[async_trait]
impl DocumentApi for DocumentService {
    async fn register_upload(
        &self,
        notification: UploadNotification,
    ) -> Result<Document, UploadError> {
        self.uploads.handle(notification).await
    }

    async fn register_uploads(
        &self,
        notifications: Vec<UploadNotification>,
    ) -> Vec<Result<Document, UploadError>> {
        self.uploads.handle_batch(notifications).await
    }

    async fn ingest(&self, job: IngestionJob) -> IngestOutcome {
        self.pipeline.run_to_outcome(job).await
    }

    async fn ingest_batch(&self, jobs: Vec<IngestionJob>) -> Vec<IngestOutcome> {
        self.pipeline.process_batch(jobs).await
    }

    async fn answer(&self, request: QueryRequest) -> Result<Answer, AnswerError> {
        self.engine.answer(&request).await
    }

    async fn document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        self.documents.get(user_id, document_id).await
    }

    async fn documents(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError> {
        self.documents.list(user_id).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
