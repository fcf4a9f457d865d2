use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and answering activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_uploaded: AtomicU64,
    documents_ready: AtomicU64,
    documents_failed: AtomicU64,
    units_indexed: AtomicU64,
    last_chunk_size: AtomicU64,
    questions_answered: AtomicU64,
    generation_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document registered from an upload notification.
    pub fn record_upload(&self) {
        self.documents_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document that reached `READY` and the number of units in its index.
    pub fn record_ready(&self, unit_count: u64, chunk_size: usize) {
        self.documents_ready.fetch_add(1, Ordering::Relaxed);
        self.units_indexed.fetch_add(unit_count, Ordering::Relaxed);
        self.last_chunk_size
            .store(chunk_size as u64, Ordering::Relaxed);
    }

    /// Record an ingestion attempt that ended in `FAILED`.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully answered question.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion provider failure while answering.
    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_chunk_size = match self.last_chunk_size.load(Ordering::Relaxed) {
            0 => None,
            value => Some(value),
        };
        MetricsSnapshot {
            documents_uploaded: self.documents_uploaded.load(Ordering::Relaxed),
            documents_ready: self.documents_ready.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            units_indexed: self.units_indexed.load(Ordering::Relaxed),
            last_chunk_size,
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents registered from upload notifications since startup.
    pub documents_uploaded: u64,
    /// Ingestion attempts that ended in `READY`.
    pub documents_ready: u64,
    /// Ingestion attempts that ended in `FAILED`.
    pub documents_failed: u64,
    /// Total index entries written across all ready documents.
    pub units_indexed: u64,
    /// Token budget used by the most recent successful ingestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk_size: Option<u64>,
    /// Questions answered and appended to conversation memory.
    pub questions_answered: u64,
    /// Completion provider failures observed while answering.
    pub generation_failures: u64,
}
