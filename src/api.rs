//! HTTP surface for Rusty Docs.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /uploads` – Register an uploaded blob (`{ "bucketKey", "size" }`) and queue it for
//!   ingestion. Returns the created document record.
//! - `POST /uploads/batch` – Register `{ "records": [...] }` notifications independently and
//!   report a per-record result.
//! - `POST /ingest` – Run one ingestion job (`{ "documentId", "key", "user" }`) synchronously
//!   and return its terminal status.
//! - `POST /ingest/batch` – Run `{ "jobs": [...] }` in order and return every terminal status.
//! - `POST /query` – Answer a question about a ready document with page references. A document
//!   without a complete index answers `409` with `{ "error": "document not ready" }`.
//! - `GET /documents/{user}` – List a user's document records, oldest first.
//! - `GET /documents/{user}/{document_id}` – Fetch a document record and its status.
//! - `GET /metrics` – Observe ingestion and answering counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::answer::{AnswerError, QueryRequest};
use crate::ingest::{IngestOutcome, IngestionJob, UploadError, UploadNotification};
use crate::service::DocumentApi;
use crate::storage::{Document, DocumentStoreError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the document API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DocumentApi + 'static,
{
    Router::new()
        .route("/uploads", post(register_upload::<S>))
        .route("/uploads/batch", post(register_uploads::<S>))
        .route("/ingest", post(ingest_document::<S>))
        .route("/ingest/batch", post(ingest_documents::<S>))
        .route("/query", post(query_document::<S>))
        .route("/documents/:user", get(list_documents::<S>))
        .route("/documents/:user/:document_id", get(get_document::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Register an uploaded blob and queue it for ingestion.
async fn register_upload<S>(
    State(service): State<Arc<S>>,
    Json(notification): Json<UploadNotification>,
) -> Result<impl IntoResponse, AppError>
where
    S: DocumentApi,
{
    let document = service.register_upload(notification).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Request body for `POST /uploads/batch`.
#[derive(Deserialize)]
struct UploadBatchRequest {
    records: Vec<UploadNotification>,
}

/// Per-record result of a batch upload registration.
#[derive(Serialize)]
#[serde(untagged)]
enum UploadBatchItem {
    Registered(Document),
    Rejected {
        #[serde(rename = "bucketKey")]
        bucket_key: String,
        error: String,
    },
}

/// Register a batch of uploads; failures are reported per record.
async fn register_uploads<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<UploadBatchRequest>,
) -> impl IntoResponse
where
    S: DocumentApi,
{
    let keys: Vec<String> = request
        .records
        .iter()
        .map(|record| record.bucket_key.clone())
        .collect();
    let results = service.register_uploads(request.records).await;
    let items: Vec<UploadBatchItem> = keys
        .into_iter()
        .zip(results)
        .map(|(bucket_key, result)| match result {
            Ok(document) => UploadBatchItem::Registered(document),
            Err(error) => UploadBatchItem::Rejected {
                bucket_key,
                error: error.to_string(),
            },
        })
        .collect();
    Json(json!({ "results": items }))
}

/// Request body for `POST /ingest/batch`.
#[derive(Deserialize)]
struct IngestBatchRequest {
    jobs: Vec<IngestionJob>,
}

/// Response body for `POST /ingest/batch`.
#[derive(Serialize)]
struct IngestBatchResponse {
    outcomes: Vec<IngestOutcome>,
}

/// Run a batch of ingestion jobs and report every terminal status.
async fn ingest_documents<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestBatchRequest>,
) -> impl IntoResponse
where
    S: DocumentApi,
{
    let outcomes = service.ingest_batch(request.jobs).await;
    tracing::info!(jobs = outcomes.len(), "Ingest batch completed");
    Json(IngestBatchResponse { outcomes })
}

/// Run one ingestion job and report its terminal status.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(job): Json<IngestionJob>,
) -> impl IntoResponse
where
    S: DocumentApi,
{
    let outcome = service.ingest(job).await;
    tracing::info!(
        user = %outcome.user_id,
        document = %outcome.document_id,
        status = %outcome.status,
        "Ingest request completed"
    );
    Json(outcome)
}

/// Answer a question about a ready document.
async fn query_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, AppError>
where
    S: DocumentApi,
{
    let answer = service.answer(request).await?;
    Ok(Json(answer))
}

/// List a user's document records.
async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: DocumentApi,
{
    let documents = service.documents(&user).await?;
    Ok(Json(json!({ "documents": documents })))
}

/// Fetch a document record.
async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path((user, document_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: DocumentApi,
{
    match service.document(&user, &document_id).await? {
        Some(document) => Ok(Json(document)),
        None => Err(AppError::new(StatusCode::NOT_FOUND, "document not found")),
    }
}

/// Return a concise metrics snapshot.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> impl IntoResponse
where
    S: DocumentApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "register_upload",
                method: "POST",
                path: "/uploads",
                description: "Register an uploaded PDF or zip archive stored under `user/filename` and queue it for ingestion. Returns the document record with status UPLOADED.",
                request_example: Some(json!({
                    "bucketKey": "alice/Annual+Report.pdf",
                    "size": 48213
                })),
            },
            CommandDescriptor {
                name: "register_uploads",
                method: "POST",
                path: "/uploads/batch",
                description: "Register several uploads at once. Each record succeeds or fails on its own; failures carry the bucketKey and an error.",
                request_example: Some(json!({
                    "records": [
                        { "bucketKey": "alice/Annual+Report.pdf", "size": 48213 },
                        { "bucketKey": "alice/scans.zip", "size": 901122 }
                    ]
                })),
            },
            CommandDescriptor {
                name: "ingest",
                method: "POST",
                path: "/ingest",
                description: "Parse, embed, and index one uploaded document. Returns { \"status\": \"READY\" | \"FAILED\" }.",
                request_example: Some(json!({
                    "documentId": "3f0c1d2e-7a55-4c1b-9a59-2b8c7d0e4f11",
                    "key": "alice/Annual Report.pdf",
                    "user": "alice"
                })),
            },
            CommandDescriptor {
                name: "ingest_batch",
                method: "POST",
                path: "/ingest/batch",
                description: "Run several ingestion jobs in order. Returns one outcome per job; a failed job never stops the rest.",
                request_example: Some(json!({
                    "jobs": [{
                        "documentId": "3f0c1d2e-7a55-4c1b-9a59-2b8c7d0e4f11",
                        "key": "alice/Annual Report.pdf",
                        "user": "alice"
                    }]
                })),
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Ask a question about a READY document. Returns the answer with page references and citations.",
                request_example: Some(json!({
                    "fileName": "Annual Report.pdf",
                    "prompt": "What was revenue in 2023?",
                    "conversationId": "c0ffee00-0000-4000-8000-000000000000",
                    "userId": "alice"
                })),
            },
            CommandDescriptor {
                name: "list_documents",
                method: "GET",
                path: "/documents/{user}",
                description: "List the user's document records with their processing status, oldest first.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_document",
                method: "GET",
                path: "/documents/{user}/{document_id}",
                description: "Return the document record, including its processing status.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and answering counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AnswerError> for AppError {
    fn from(error: AnswerError) -> Self {
        match error {
            AnswerError::IndexNotFound { .. } => {
                Self::new(StatusCode::CONFLICT, "document not ready")
            }
            AnswerError::InvalidRequest(_) => Self::new(StatusCode::BAD_REQUEST, error.to_string()),
            AnswerError::Generation(_) => Self::new(StatusCode::BAD_GATEWAY, error.to_string()),
            AnswerError::EmbeddingMismatch { .. } => {
                Self::new(StatusCode::CONFLICT, error.to_string())
            }
            other => {
                tracing::error!(error = %other, "Query failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(error: UploadError) -> Self {
        let status = match &error {
            UploadError::MalformedKey(_) | UploadError::Parse(_) => StatusCode::BAD_REQUEST,
            UploadError::Download(crate::storage::BlobError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<DocumentStoreError> for AppError {
    fn from(error: DocumentStoreError) -> Self {
        let status = match &error {
            DocumentStoreError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            DocumentStoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::answer::{Answer, AnswerError, Citation, QueryRequest};
    use crate::completion::CompletionClientError;
    use crate::ingest::{IngestOutcome, IngestionJob, UploadError, UploadNotification};
    use crate::metrics::MetricsSnapshot;
    use crate::service::DocumentApi;
    use crate::storage::{ConversationRef, Document, DocumentStatus, DocumentStoreError};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_query_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let query = commands
            .iter()
            .find(|cmd| cmd.name == "query")
            .expect("query command present");

        assert_eq!(query.method, "POST");
        assert_eq!(query.path, "/query");
        assert!(query.description.to_lowercase().contains("page"));

        assert!(commands.len() >= 5);
    }

    #[tokio::test]
    async fn query_route_returns_answer_with_page_references() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let app = create_router(service.clone());

        let payload = json!({
            "fileName": "report.pdf",
            "prompt": "What was revenue in 2023?",
            "conversationId": "conv-1",
            "userId": "alice"
        });
        let (status, body) = send(app, Method::POST, "/query", Some(payload)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Revenue was $5M (page 2).");
        assert_eq!(body["pageReferences"], json!([2]));
        assert_eq!(body["citations"][0]["source"], "report.pdf");

        let calls = service.queries.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].file_name, "report.pdf");
        assert_eq!(calls[0].conversation_id, "conv-1");
    }

    #[tokio::test]
    async fn query_for_unready_document_is_a_conflict() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::NotReady));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/query",
            Some(json!({
                "fileName": "report.pdf",
                "prompt": "anything",
                "conversationId": "conv-1",
                "userId": "alice"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({ "error": "document not ready" }));
    }

    #[tokio::test]
    async fn generation_failures_surface_as_bad_gateway() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::GenerationFails));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/query",
            Some(json!({
                "fileName": "report.pdf",
                "prompt": "anything",
                "conversationId": "conv-1",
                "userId": "alice"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().expect("message").contains("upstream"));
    }

    #[tokio::test]
    async fn upload_route_creates_document() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/uploads",
            Some(json!({ "bucketKey": "alice/report.pdf", "size": 10 })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["userid"], "alice");
        assert_eq!(body["docstatus"], "UPLOADED");
    }

    #[tokio::test]
    async fn malformed_upload_keys_are_bad_requests() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, _) = send(
            create_router(service),
            Method::POST,
            "/uploads",
            Some(json!({ "bucketKey": "report.pdf", "size": 10 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ingest_route_accepts_lowercase_document_id() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/ingest",
            Some(json!({ "documentid": "doc-1", "key": "alice/report.pdf", "user": "alice" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documentId"], "doc-1");
        assert_eq!(body["status"], "READY");
        assert_eq!(body["units"], 3);
    }

    #[tokio::test]
    async fn batch_upload_reports_each_record() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/uploads/batch",
            Some(json!({
                "records": [
                    { "bucketKey": "no-user.pdf", "size": 1 },
                    { "bucketKey": "alice/report.pdf", "size": 10 }
                ]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().expect("results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["bucketKey"], "no-user.pdf");
        assert!(results[0]["error"].as_str().expect("error").contains("malformed"));
        assert_eq!(results[1]["docstatus"], "UPLOADED");
    }

    #[tokio::test]
    async fn batch_ingest_returns_every_outcome() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(
            create_router(service),
            Method::POST,
            "/ingest/batch",
            Some(json!({
                "jobs": [
                    { "documentId": "doc-1", "key": "alice/notes.txt", "user": "alice" },
                    { "documentId": "doc-2", "key": "alice/report.pdf", "user": "alice" }
                ]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let outcomes = body["outcomes"].as_array().expect("outcomes");
        assert_eq!(outcomes[0]["status"], "FAILED");
        assert_eq!(outcomes[0]["error"], "unsupported source");
        assert_eq!(outcomes[1]["documentId"], "doc-2");
        assert_eq!(outcomes[1]["status"], "READY");
    }

    #[tokio::test]
    async fn documents_route_lists_a_users_records() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(create_router(service), Method::GET, "/documents/alice", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"][0]["userid"], "alice");
        assert_eq!(body["documents"][0]["documentid"], "doc-1");
    }

    #[tokio::test]
    async fn document_route_distinguishes_missing_records() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let app = create_router(service);

        let (status, body) = send(app.clone(), Method::GET, "/documents/alice/doc-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documentid"], "doc-1");

        let (status, _) = send(app, Method::GET, "/documents/alice/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_route_serializes_snapshot() {
        let service = Arc::new(StubDocumentService::new(QueryBehavior::Answer));
        let (status, body) = send(create_router(service), Method::GET, "/metrics", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents_ready"], 4);
        assert!(body.get("last_chunk_size").is_none());
    }

    async fn send(
        app: axum::Router,
        method: Method,
        uri: &str,
        payload: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = payload
            .map(|payload| Body::from(payload.to_string()))
            .unwrap_or_else(Body::empty);
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("router response");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[derive(Clone, Copy)]
    enum QueryBehavior {
        Answer,
        NotReady,
        GenerationFails,
    }

    struct StubDocumentService {
        queries: Arc<Mutex<Vec<QueryRequest>>>,
        behavior: QueryBehavior,
    }

    impl StubDocumentService {
        fn new(behavior: QueryBehavior) -> Self {
            Self {
                queries: Arc::new(Mutex::new(Vec::new())),
                behavior,
            }
        }
    }

    fn sample_document(user_id: &str, document_id: &str, filename: &str) -> Document {
        Document {
            user_id: user_id.into(),
            document_id: document_id.into(),
            filename: filename.into(),
            created: "2024-05-01T12:00:00.000000Z".into(),
            pages: 3,
            filesize: 10,
            status: DocumentStatus::Uploaded,
            conversations: vec![ConversationRef {
                conversation_id: "conv-1".into(),
                created: "2024-05-01T12:00:00.000000Z".into(),
            }],
        }
    }

    #[async_trait]
    impl DocumentApi for StubDocumentService {
        async fn register_upload(
            &self,
            notification: UploadNotification,
        ) -> Result<Document, UploadError> {
            let (user, file) = notification
                .bucket_key
                .split_once('/')
                .ok_or_else(|| UploadError::MalformedKey(notification.bucket_key.clone()))?;
            Ok(sample_document(user, "doc-1", file))
        }

        async fn register_uploads(
            &self,
            notifications: Vec<UploadNotification>,
        ) -> Vec<Result<Document, UploadError>> {
            let mut results = Vec::new();
            for notification in notifications {
                results.push(self.register_upload(notification).await);
            }
            results
        }

        async fn ingest(&self, job: IngestionJob) -> IngestOutcome {
            let failed = job.key.ends_with(".txt");
            IngestOutcome {
                document_id: job.document_id,
                user_id: job.user,
                status: if failed {
                    DocumentStatus::Failed
                } else {
                    DocumentStatus::Ready
                },
                units: (!failed).then_some(3),
                error: failed.then(|| "unsupported source".to_string()),
            }
        }

        async fn ingest_batch(&self, jobs: Vec<IngestionJob>) -> Vec<IngestOutcome> {
            let mut outcomes = Vec::new();
            for job in jobs {
                outcomes.push(self.ingest(job).await);
            }
            outcomes
        }

        async fn answer(&self, request: QueryRequest) -> Result<Answer, AnswerError> {
            self.queries.lock().await.push(request.clone());
            match self.behavior {
                QueryBehavior::Answer => Ok(Answer {
                    answer: "Revenue was $5M (page 2).".into(),
                    page_references: vec![2],
                    citations: vec![Citation {
                        page: 2,
                        source: request.file_name,
                    }],
                }),
                QueryBehavior::NotReady => Err(AnswerError::IndexNotFound {
                    user_id: request.user_id,
                    file_name: request.file_name,
                }),
                QueryBehavior::GenerationFails => Err(AnswerError::Generation(
                    CompletionClientError::GenerationFailed("upstream returned 500".into()),
                )),
            }
        }

        async fn document(
            &self,
            user_id: &str,
            document_id: &str,
        ) -> Result<Option<Document>, DocumentStoreError> {
            Ok((document_id == "doc-1")
                .then(|| sample_document(user_id, document_id, "report.pdf")))
        }

        async fn documents(&self, user_id: &str) -> Result<Vec<Document>, DocumentStoreError> {
            if user_id.contains("..") {
                return Err(DocumentStoreError::InvalidKey(user_id.to_string()));
            }
            Ok(vec![sample_document(user_id, "doc-1", "report.pdf")])
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_ready: 4,
                ..MetricsSnapshot::default()
            }
        }
    }
}
