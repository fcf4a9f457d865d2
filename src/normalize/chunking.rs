//! Token budgets and page-level splitting.
//!
//! - Automatic sizing: a quarter of the embedding model's context window (an eighth with
//!   `TEXT_SPLITTER_USE_SAFE_DEFAULTS=1`), clamped to `[256, 1024]` tokens, unless
//!   `TEXT_SPLITTER_CHUNK_SIZE` overrides it.
//! - Token counting: `tiktoken-rs` for OpenAI and known encodings, whitespace counting otherwise.
//! - Splitting: `semchunk-rs` finds semantic boundaries; an optional token overlap carries the
//!   tail of one segment into the next.

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

/// Counts tokens in a text segment.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;
const HASH_CONTEXT_WINDOW: usize = 2048;

/// Errors produced while preparing the token budget.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Pick the per-unit token budget.
///
/// An explicit override wins (floored at 1). Otherwise the budget is derived from the
/// provider/model context window and clamped into `[256, 1024]`.
pub(crate) fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
    use_safe_defaults: bool,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    let divisor = if use_safe_defaults { 8 } else { 4 };
    (window / divisor).clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama => ollama_embedding_context_window(model),
        EmbeddingProvider::Hash => HASH_CONTEXT_WINDOW,
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8192;
    }

    let size = get_context_size(model);
    if size == 4096 && model.contains("embedding") {
        tracing::debug!(model, "Using default embedding context window fallback");
    }
    size
}

fn ollama_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default Ollama context window estimate");
            4096
        }
    }
}

/// Build a token counter for the given provider/model.
///
/// OpenAI models must resolve a tokenizer. Ollama models try one and fall back to whitespace
/// counting; the hashing embedder always counts whitespace-separated words.
pub(crate) fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; falling back to whitespace counter"
                );
                Ok(whitespace_token_counter())
            }
        },
        EmbeddingProvider::Hash => Ok(whitespace_token_counter()),
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Ok(encoding);
    }
    match model {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        _ => {
            tracing::warn!(
                model,
                "Falling back to 'cl100k_base' encoding for token counting"
            );
            cl100k_base()
        }
    }
}

/// Count whitespace-separated words; non-empty text always counts as at least one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

/// Split `text` into segments of at most `chunk_size` tokens.
///
/// With `overlap > 0`, every segment after the first is prefixed by up to `overlap` tokens
/// from the end of its predecessor, then trimmed from the front to stay within budget.
pub(crate) fn split_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let counter = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter.as_ref()(segment)),
    );
    let segments = chunker.chunk(text);

    let overlap = overlap.min(chunk_size.saturating_sub(1));
    if overlap == 0 || segments.len() < 2 {
        return segments;
    }

    let mut overlapped = Vec::with_capacity(segments.len());
    overlapped.push(segments[0].clone());
    for pair in segments.windows(2) {
        let tail = tail_within(&pair[0], overlap, token_counter);
        let combined = if tail.is_empty() {
            pair[1].clone()
        } else {
            format!("{tail} {}", pair[1].trim_start())
        };
        overlapped.push(tail_within(&combined, chunk_size, token_counter).to_string());
    }
    overlapped
}

/// Longest suffix of `text` (starting on a char boundary) that fits in `budget` tokens.
///
/// Suffix token counts never grow as the start moves right, so the first fitting start is found
/// by bisection.
fn tail_within<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    let starts: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    let first_fit = starts
        .partition_point(|&offset| token_counter.as_ref()(text[offset..].trim_start()) > budget);
    starts
        .get(first_fit)
        .map(|&offset| text[offset..].trim_start())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_text_respects_chunk_size_whitespace_counter() {
        let counter = whitespace_token_counter();
        let chunks = split_text("one two three four five", 2, 0, &counter);
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn split_text_applies_overlap_within_budget() {
        let counter = whitespace_token_counter();
        let chunks = split_text("one two three four five", 3, 1, &counter);
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn overlap_tail_is_found_with_few_token_counts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let words = whitespace_token_counter();
        let counter: TokenCounter = {
            let calls = calls.clone();
            Arc::new(move |segment: &str| {
                calls.fetch_add(1, Ordering::Relaxed);
                words.as_ref()(segment)
            })
        };
        let text = (0..2000)
            .map(|n| format!("w{n}"))
            .collect::<Vec<_>>()
            .join(" ");

        assert_eq!(tail_within(&text, 3, &counter), "w1997 w1998 w1999");
        assert!(calls.load(Ordering::Relaxed) < 32);
        assert_eq!(tail_within("", 3, &counter), "");
        assert_eq!(tail_within("toolong", 0, &counter), "");
    }

    #[test]
    fn tiktoken_budget_is_respected_without_losing_words() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let counter = build_token_counter(EmbeddingProvider::OpenAI, "text-embedding-3-small")
            .expect("tokenizer");
        let chunks = split_text(text, 5, 0, &counter);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 5);
        }
        let words: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }

    #[test]
    fn determine_chunk_size_prefers_override() {
        let size = determine_chunk_size(Some(42), EmbeddingProvider::OpenAI, "any", false);
        assert_eq!(size, 42);
        assert_eq!(
            determine_chunk_size(Some(0), EmbeddingProvider::OpenAI, "any", false),
            1
        );
    }

    #[test]
    fn determine_chunk_size_infers_embedding_windows() {
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::OpenAI, "text-embedding-3-small", false),
            1024
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Ollama, "all-minilm-l6-v2", false),
            256
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Ollama, "custom-model", true),
            512
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Hash, "hash", false),
            512
        );
    }

    #[test]
    fn hash_provider_counts_words() {
        let counter = build_token_counter(EmbeddingProvider::Hash, "hash").expect("counter");
        assert_eq!(counter.as_ref()("Revenue was $5M"), 3);
        assert_eq!(counter.as_ref()("   "), 1);
    }
}
