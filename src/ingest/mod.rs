//! Document ingestion: upload registration, the per-document pipeline, and the queue worker.
//!
//! Upload notifications become [`Document`](crate::storage::Document) records plus an
//! [`IngestionJob`] on the queue. The worker hands each job to [`IngestionPipeline::run`],
//! which drives the document from `PROCESSING` to `READY` or `FAILED`.

mod pipeline;
mod upload;
mod worker;

pub use pipeline::{IngestError, IngestOutcome, IngestReport, IngestionPipeline};
pub use upload::{UploadError, UploadHandler, UploadNotification};
pub use worker::{ChannelQueue, IngestionQueue, IngestionWorker, QueueError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

/// Work item telling the pipeline which uploaded blob to index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// Record id created by the upload handler.
    #[serde(rename = "documentId", alias = "documentid")]
    pub document_id: String,
    /// Blob key of the upload, `user/filename`.
    pub key: String,
    /// Owning user.
    pub user: String,
}

impl IngestionJob {
    /// Filename within the user's namespace: the last segment of the blob key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub(crate) fn iso_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
