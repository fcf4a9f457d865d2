//! Per-document embedding indexes.
//!
//! An [`EmbeddingIndex`] is an immutable, flat collection of unit-length vectors, each paired
//! with the [`TextUnit`] it was computed from. Similarity is the inner product, which on
//! unit vectors equals cosine similarity; queries are normalized the same way before scoring.

mod builder;
mod store;

pub use builder::{EmbeddingError, IndexBuilder};
pub use store::{IndexStore, IndexStoreError};

use crate::embedding::l2_normalize;
use crate::parser::TextUnit;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Similarity function used at build and query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Inner product over L2-normalized vectors.
    InnerProduct,
}

/// Identifies one persisted index: a document within a user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    /// Owning user.
    pub user_id: String,
    /// Document filename within the user's namespace.
    pub document: String,
}

impl IndexKey {
    /// Key for `document` owned by `user_id`.
    pub fn new(user_id: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            document: document.into(),
        }
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.document)
    }
}

/// Searchable vectors plus the units they map back to.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingIndex {
    model: String,
    dimension: usize,
    metric: DistanceMetric,
    entries: Vec<TextUnit>,
    vectors: Vec<f32>,
}

/// One retrieval result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit<'a> {
    /// Similarity to the query; higher is closer.
    pub score: f32,
    /// Unit the matching vector was computed from.
    pub entry: &'a TextUnit,
}

impl EmbeddingIndex {
    /// Assemble an index from row-major `vectors`, one row of `dimension` values per entry.
    ///
    /// Returns `None` when the vector buffer does not hold exactly one row per entry.
    pub(crate) fn from_parts(
        model: String,
        dimension: usize,
        entries: Vec<TextUnit>,
        vectors: Vec<f32>,
    ) -> Option<Self> {
        if dimension == 0 || vectors.len() != entries.len() * dimension {
            return None;
        }
        Some(Self {
            model,
            dimension,
            metric: DistanceMetric::InnerProduct,
            entries,
            vectors,
        })
    }

    /// Embedding model the vectors were produced with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Length of every vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Similarity function used by [`EmbeddingIndex::search`].
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in build order.
    pub fn entries(&self) -> &[TextUnit] {
        &self.entries
    }

    pub(crate) fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    fn row(&self, index: usize) -> &[f32] {
        &self.vectors[index * self.dimension..(index + 1) * self.dimension]
    }

    /// Return up to `k` entries ranked by similarity to `query`, best first.
    ///
    /// Ties keep build order. Returns nothing when the query dimension does not match.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit<'_>> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = (0..self.entries.len())
            .map(|index| {
                let score = self
                    .row(index)
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (index, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(index, score)| SearchHit {
                score,
                entry: &self.entries[index],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::UnitOrigin;

    fn unit(page: u32) -> TextUnit {
        TextUnit {
            text: format!("page {page}"),
            page,
            source: "doc.pdf".into(),
            origin: UnitOrigin::Text,
        }
    }

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::from_parts(
            "test".into(),
            2,
            vec![unit(1), unit(2), unit(3)],
            vec![1.0, 0.0, 0.0, 1.0, 0.6, 0.8],
        )
        .expect("index")
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let index = index();
        let hits = index.search(&[0.0, 2.0], 2);
        let pages: Vec<u32> = hits.iter().map(|hit| hit.entry.page).collect();
        assert_eq!(pages, vec![2, 3]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn search_rejects_mismatched_queries() {
        let index = index();
        assert!(index.search(&[1.0, 0.0, 0.0], 3).is_empty());
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn from_parts_requires_one_row_per_entry() {
        assert!(EmbeddingIndex::from_parts("m".into(), 2, vec![unit(1)], vec![1.0]).is_none());
        assert!(EmbeddingIndex::from_parts("m".into(), 0, Vec::new(), Vec::new()).is_none());
    }
}
