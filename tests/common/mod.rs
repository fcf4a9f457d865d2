#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document as PdfDocument, Object, Stream, dictionary};
use rustydocs::answer::AnswerOptions;
use rustydocs::completion::{CompletionClient, CompletionClientError, CompletionRequest};
use rustydocs::embedding::{EmbeddingClient, HashingEmbedder};
use rustydocs::ingest::{ChannelQueue, IngestionJob, UploadNotification};
use rustydocs::memory::MemoryConversationStore;
use rustydocs::normalize::{Normalizer, whitespace_token_counter};
use rustydocs::parser::DocumentParser;
use rustydocs::service::{Components, DocumentApi, DocumentService, Settings};
use rustydocs::storage::{BlobStore, Document, MemoryBlobStore, MemoryDocumentRepository};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

pub const INDEX_PREFIX: &str = "indexes";

/// Completion client that answers with the best-ranked passage and records every request.
#[derive(Default)]
pub struct ScriptedCompletion {
    pub requests: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let best = request
            .messages
            .first()
            .and_then(|system| {
                system
                    .content
                    .lines()
                    .find(|line| line.starts_with("[1] "))
                    .map(|line| line.trim_start_matches("[1] ").to_string())
            })
            .unwrap_or_else(|| "I do not know.".to_string());
        self.requests.lock().await.push(request);
        Ok(format!("According to the document: {best}"))
    }
}

/// In-memory service plus handles on every store behind it.
pub struct Fixture {
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<MemoryDocumentRepository>,
    pub conversations: Arc<MemoryConversationStore>,
    pub completion: Arc<ScriptedCompletion>,
    pub service: DocumentService,
    pub jobs: mpsc::Receiver<IngestionJob>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(HashingEmbedder::new("hash-test", 512)),
        )
    }

    pub fn with(blobs: Arc<dyn BlobStore>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        let documents = Arc::new(MemoryDocumentRepository::new());
        let conversations = Arc::new(MemoryConversationStore::new());
        let completion = Arc::new(ScriptedCompletion::default());
        let (queue, jobs) = ChannelQueue::new(16);

        let service = DocumentService::new(
            Components {
                blobs: blobs.clone(),
                documents: documents.clone(),
                conversations: conversations.clone(),
                embedder,
                completion: completion.clone(),
                parser: DocumentParser::new(64 << 20),
                normalizer: Normalizer::new(512, 0, whitespace_token_counter())
                    .expect("normalizer"),
            },
            Settings {
                index_prefix: INDEX_PREFIX.into(),
                embedding_batch_size: 4,
                answer: AnswerOptions {
                    completion_model: "test-model".into(),
                    ..AnswerOptions::default()
                },
            },
            Arc::new(queue),
        );

        Self {
            blobs,
            documents,
            conversations,
            completion,
            service,
            jobs,
        }
    }

    /// Store `bytes` under `key`, register the upload, and return the record and its queued job.
    pub async fn upload(&mut self, key: &str, bytes: Vec<u8>) -> (Document, IngestionJob) {
        let size = bytes.len() as u64;
        self.blobs.put(key, bytes).await.expect("store upload");
        let document = self
            .service
            .register_upload(UploadNotification {
                bucket_key: key.replace(' ', "+"),
                size,
            })
            .await
            .expect("register upload");
        let job = self.jobs.recv().await.expect("queued job");
        (document, job)
    }
}

/// Build a PDF with one page per entry in `pages`, each showing that text.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

/// Zip the given `(name, bytes)` members in order.
pub fn zip_archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in members {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start member");
        writer.write_all(bytes).expect("write member");
    }
    writer.finish().expect("finish zip").into_inner()
}
