//! Text normalization: parsed units to the exact sequence that gets embedded.
//!
//! Policy, applied identically to every document:
//!
//! 1. Control characters are removed, whitespace inside a line collapses to one space, and blank
//!    lines are dropped.
//! 2. Units that are empty after cleaning are dropped.
//! 3. Units over the token budget are split into ordered segments; each segment keeps the
//!    page, source, and origin of the unit it came from.
//!
//! Units are never merged, so every normalized unit maps to exactly one page.

mod chunking;

pub use chunking::{ChunkingError, TokenCounter, whitespace_token_counter};

use crate::config::Config;
use crate::parser::TextUnit;
use chunking::{build_token_counter, determine_chunk_size, split_text};

/// Turns parsed units into embeddable units under a fixed token budget.
#[derive(Clone)]
pub struct Normalizer {
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl Normalizer {
    /// Build a normalizer with an explicit budget and token counter.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        token_counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap,
            token_counter,
        })
    }

    /// Build a normalizer whose budget and tokenizer follow the configured embedding model.
    pub fn from_config(config: &Config) -> Result<Self, ChunkingError> {
        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
            config.text_splitter_use_safe_defaults,
        );
        let overlap = config.text_splitter_chunk_overlap.unwrap_or(0);
        tracing::debug!(
            chunk_size,
            override = config.text_splitter_chunk_size,
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            overlap,
            use_safe_defaults = config.text_splitter_use_safe_defaults,
            "Derived chunk size"
        );
        let token_counter =
            build_token_counter(config.embedding_provider, &config.embedding_model)?;
        Self::new(chunk_size, overlap, token_counter)
    }

    /// Token budget per normalized unit.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Clean, filter, and split `units`, preserving their order.
    pub fn normalize(&self, units: Vec<TextUnit>) -> Vec<TextUnit> {
        let input = units.len();
        let mut normalized = Vec::with_capacity(units.len());
        let mut dropped = 0usize;

        for unit in units {
            let text = clean_text(&unit.text);
            if text.is_empty() {
                dropped += 1;
                continue;
            }

            if self.token_counter.as_ref()(&text) <= self.chunk_size {
                normalized.push(TextUnit { text, ..unit });
                continue;
            }

            for segment in split_text(&text, self.chunk_size, self.overlap, &self.token_counter) {
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                normalized.push(TextUnit {
                    text: segment.to_string(),
                    page: unit.page,
                    source: unit.source.clone(),
                    origin: unit.origin,
                });
            }
        }

        tracing::debug!(
            input,
            output = normalized.len(),
            dropped,
            chunk_size = self.chunk_size,
            "Normalized text units"
        );
        normalized
    }
}

fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split(|c: char| c.is_whitespace() || c.is_control())
                .filter(|word| !word.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
