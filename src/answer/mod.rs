//! Retrieval-augmented answering over one document's index, with conversation memory.
//!
//! For each question the engine loads the `(user, file)` index, reads the conversation
//! history, embeds the question with the model the index was built with, retrieves the
//! closest units, and asks the completion provider for a grounded answer. The turn is
//! appended to memory only after the provider succeeds; the session lock is held from the
//! history read to that append.

mod prompt;

use crate::completion::{CompletionClient, CompletionClientError, CompletionRequest};
use crate::config;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::index::{IndexKey, IndexStore, IndexStoreError};
use crate::memory::{ConversationMemory, MemoryError};
use crate::metrics::PipelineMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while answering a question.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Request was missing a required field.
    #[error("invalid query: {0}")]
    InvalidRequest(String),
    /// No complete index exists yet; shown to users as "document not ready".
    #[error("document not ready: {user_id}/{file_name}")]
    IndexNotFound {
        /// Owning user.
        user_id: String,
        /// Requested document.
        file_name: String,
    },
    /// Index artifacts exist but could not be read.
    #[error(transparent)]
    Index(IndexStoreError),
    /// Conversation history could not be read or written.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Question could not be embedded.
    #[error("failed to embed question: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Query embedding space differs from the one the index was built in.
    #[error(
        "embedding mismatch: index built with {index_model} ({index_dimension}d), \
         query uses {query_model} ({query_dimension}d)"
    )]
    EmbeddingMismatch {
        /// Model recorded in the index.
        index_model: String,
        /// Dimension recorded in the index.
        index_dimension: usize,
        /// Model of the configured embedding client.
        query_model: String,
        /// Dimension of the query vector.
        query_dimension: usize,
    },
    /// Completion provider failed; memory was not modified.
    #[error("failed to generate answer: {0}")]
    Generation(#[source] CompletionClientError),
}

/// Question about one document within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Document filename within the user's namespace.
    pub file_name: String,
    /// The question.
    pub prompt: String,
    /// Conversation the turn belongs to.
    pub conversation_id: String,
    /// Owning user.
    pub user_id: String,
}

/// A cited location in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based page number, local to `source`.
    pub page: u32,
    /// Document or archive member the page belongs to.
    pub source: String,
}

/// Grounded answer plus the pages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Provider reply.
    pub answer: String,
    /// Distinct pages of the retrieved units, best match first.
    pub page_references: Vec<u32>,
    /// Distinct (source, page) pairs of the retrieved units, best match first.
    pub citations: Vec<Citation>,
}

/// Retrieval and completion settings.
#[derive(Debug, Clone)]
pub struct AnswerOptions {
    /// Units retrieved per question.
    pub top_k: usize,
    /// Hits scoring below this are not used as context.
    pub score_threshold: Option<f32>,
    /// Completion model identifier.
    pub completion_model: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for AnswerOptions {
    /// The retrieval defaults a configuration without overrides produces.
    fn default() -> Self {
        Self {
            top_k: config::DEFAULT_RETRIEVAL_TOP_K,
            score_threshold: Some(config::DEFAULT_RETRIEVAL_SCORE_THRESHOLD),
            completion_model: config::DEFAULT_COMPLETION_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

/// Answers questions against persisted indexes.
pub struct AnswerEngine {
    indexes: IndexStore,
    embedder: Arc<dyn EmbeddingClient>,
    completion: Arc<dyn CompletionClient>,
    memory: Arc<ConversationMemory>,
    options: AnswerOptions,
    metrics: Arc<PipelineMetrics>,
}

impl AnswerEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        indexes: IndexStore,
        embedder: Arc<dyn EmbeddingClient>,
        completion: Arc<dyn CompletionClient>,
        memory: Arc<ConversationMemory>,
        options: AnswerOptions,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            indexes,
            embedder,
            completion,
            memory,
            options,
            metrics,
        }
    }

    /// Answer `request.prompt` about `request.file_name`, continuing the conversation.
    pub async fn answer(&self, request: &QueryRequest) -> Result<Answer, AnswerError> {
        validate(request)?;
        let _session = self.memory.lock_session(&request.conversation_id).await;

        let key = IndexKey::new(&request.user_id, &request.file_name);
        let index = self.indexes.load(&key).await.map_err(|error| match error {
            IndexStoreError::NotFound { .. } | IndexStoreError::InvalidKey(_) => {
                tracing::debug!(index = %key, error = %error, "Index unavailable");
                AnswerError::IndexNotFound {
                    user_id: request.user_id.clone(),
                    file_name: request.file_name.clone(),
                }
            }
            other => AnswerError::Index(other),
        })?;

        let history = self.memory.history(&request.conversation_id).await?;

        let mismatch = |query_dimension: usize| AnswerError::EmbeddingMismatch {
            index_model: index.model().to_string(),
            index_dimension: index.dimension(),
            query_model: self.embedder.model().to_string(),
            query_dimension,
        };
        if self.embedder.model() != index.model() || self.embedder.dimension() != index.dimension()
        {
            return Err(mismatch(self.embedder.dimension()));
        }
        let query = self
            .embedder
            .generate_embeddings(vec![request.prompt.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EmbeddingClientError::InvalidResponse("no vector returned for question".into())
            })?;
        if query.len() != index.dimension() {
            return Err(mismatch(query.len()));
        }

        let threshold = self.options.score_threshold;
        let hits: Vec<_> = index
            .search(&query, self.options.top_k)
            .into_iter()
            .filter(|hit| threshold.is_none_or(|minimum| hit.score >= minimum))
            .collect();
        tracing::debug!(
            user = %request.user_id,
            document = %request.file_name,
            conversation = %request.conversation_id,
            retrieved = hits.len(),
            history = history.len(),
            "Retrieved context"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(prompt::grounding_message(&request.file_name, &hits));
        messages.extend(history);
        messages.push(crate::completion::ChatMessage::user(&request.prompt));

        let reply = match self
            .completion
            .complete(CompletionRequest {
                model: self.options.completion_model.clone(),
                messages,
                temperature: self.options.temperature,
            })
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                self.metrics.record_generation_failure();
                tracing::warn!(
                    user = %request.user_id,
                    document = %request.file_name,
                    conversation = %request.conversation_id,
                    error = %error,
                    "Completion failed"
                );
                return Err(AnswerError::Generation(error));
            }
        };

        self.memory
            .append_turn(&request.conversation_id, &request.prompt, &reply)
            .await?;

        let citations = distinct_citations(hits.iter().map(|hit| Citation {
            page: hit.entry.page,
            source: hit.entry.source.clone(),
        }));
        let mut seen_pages = HashSet::new();
        let page_references = citations
            .iter()
            .map(|citation| citation.page)
            .filter(|page| seen_pages.insert(*page))
            .collect();

        self.metrics.record_answer();
        tracing::info!(
            user = %request.user_id,
            document = %request.file_name,
            conversation = %request.conversation_id,
            citations = citations.len(),
            "Question answered"
        );
        Ok(Answer {
            answer: reply,
            page_references,
            citations,
        })
    }
}

fn validate(request: &QueryRequest) -> Result<(), AnswerError> {
    for (field, value) in [
        ("fileName", &request.file_name),
        ("prompt", &request.prompt),
        ("conversationId", &request.conversation_id),
        ("userId", &request.user_id),
    ] {
        if value.trim().is_empty() {
            return Err(AnswerError::InvalidRequest(format!("{field} is required")));
        }
    }
    Ok(())
}

fn distinct_citations(ranked: impl Iterator<Item = Citation>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    ranked
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}
