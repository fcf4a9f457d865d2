use super::EmbeddingIndex;
use crate::embedding::{EmbeddingClient, EmbeddingClientError, l2_normalize};
use crate::parser::TextUnit;
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort an index build. No unit is ever skipped.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Nothing survived normalization, so there is nothing to index.
    #[error("no text units to embed")]
    NoUnits,
    /// Provider failed for one of the batches.
    #[error("embedding provider failed: {0}")]
    Provider(#[from] EmbeddingClientError),
    /// Provider returned a different number of vectors than texts sent.
    #[error("provider returned {actual} vectors for {expected} units")]
    CountMismatch {
        /// Units sent in the batch.
        expected: usize,
        /// Vectors received.
        actual: usize,
    },
    /// Provider returned vectors of an unexpected length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the client advertises.
        expected: usize,
        /// Dimension received.
        actual: usize,
    },
}

/// Embeds a complete list of normalized units and assembles an [`EmbeddingIndex`].
#[derive(Clone)]
pub struct IndexBuilder {
    client: Arc<dyn EmbeddingClient>,
    batch_size: usize,
}

impl IndexBuilder {
    /// Build indexes with `client`, sending at most `batch_size` texts per provider call.
    pub fn new(client: Arc<dyn EmbeddingClient>, batch_size: usize) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every unit and return the finished index.
    pub async fn build(&self, units: Vec<TextUnit>) -> Result<EmbeddingIndex, EmbeddingError> {
        if units.is_empty() {
            return Err(EmbeddingError::NoUnits);
        }

        let dimension = self.client.dimension();
        let mut vectors = Vec::with_capacity(units.len() * dimension);

        for batch in units.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|unit| unit.text.clone()).collect();
            let embeddings = self.client.generate_embeddings(texts).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embeddings.len(),
                });
            }
            for mut vector in embeddings {
                if vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    });
                }
                l2_normalize(&mut vector);
                vectors.extend(vector);
            }
        }

        tracing::debug!(
            model = self.client.model(),
            dimension,
            units = units.len(),
            "Built embedding index"
        );
        EmbeddingIndex::from_parts(self.client.model().to_string(), dimension, units, vectors)
            .ok_or(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: 0,
            })
    }
}
