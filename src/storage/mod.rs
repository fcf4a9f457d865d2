//! Adapters for the durable collaborators: object storage and the document record table.
//!
//! Both collaborators are traits with an in-memory implementation for tests and single-process
//! runs, plus a filesystem implementation rooted under `DATA_DIR`.

pub mod blob;
pub mod documents;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use documents::{
    ConversationRef, Document, DocumentRepository, DocumentStatus, DocumentStoreError,
    FsDocumentRepository, MemoryDocumentRepository,
};

use std::path::Path;

/// Write `bytes` to `path` by way of a sibling temp file and a rename, so readers observe
/// either the previous contents or the new ones.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("blob");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp_path, bytes).await?;
    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(error);
    }
    Ok(())
}

/// Reject path segments that could escape a storage root.
pub(crate) fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('\\')
        && !segment.contains('\0')
}
