use super::{IngestionJob, IngestionPipeline};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while enqueueing a job.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The consuming worker has shut down.
    #[error("ingestion queue is closed")]
    Closed,
}

/// Destination for ingestion jobs.
#[async_trait]
pub trait IngestionQueue: Send + Sync {
    /// Hand `job` to the worker.
    async fn enqueue(&self, job: IngestionJob) -> Result<(), QueueError>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<IngestionJob>,
}

impl ChannelQueue {
    /// Create a queue holding up to `capacity` pending jobs, plus its receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IngestionJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl IngestionQueue for ChannelQueue {
    async fn enqueue(&self, job: IngestionJob) -> Result<(), QueueError> {
        self.sender.send(job).await.map_err(|_| QueueError::Closed)
    }
}

/// Consumes queued jobs and runs them through the pipeline with bounded concurrency.
pub struct IngestionWorker {
    pipeline: Arc<IngestionPipeline>,
    receiver: mpsc::Receiver<IngestionJob>,
    concurrency: usize,
}

impl IngestionWorker {
    /// Worker draining `receiver` with at most `concurrency` jobs in flight.
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        receiver: mpsc::Receiver<IngestionJob>,
        concurrency: usize,
    ) -> Self {
        Self {
            pipeline,
            receiver,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until every sender is dropped and the queue is drained.
    pub async fn run(self) {
        let Self {
            pipeline,
            receiver,
            concurrency,
        } = self;
        tracing::info!(concurrency, "Ingestion worker started");

        let jobs = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|job| (job, receiver))
        });
        jobs.for_each_concurrent(concurrency, |job| {
            let pipeline = pipeline.clone();
            async move {
                // Failures are logged and recorded by the pipeline itself.
                let _ = pipeline.run(job).await;
            }
        })
        .await;

        tracing::info!("Ingestion worker stopped");
    }
}
