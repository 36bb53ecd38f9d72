use crate::error::Result;
use crate::registry::{UploadDoc, UploadRegistry};
use crate::storage::ChunkStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Deletes upload documents together with the part chunks they refer
/// to; drives the expiry sweep.
pub struct RemoveUploadOperation {
    registry: Arc<dyn UploadRegistry>,
    chunks: Arc<dyn ChunkStore>,
}

impl RemoveUploadOperation {
    pub fn new(registry: Arc<dyn UploadRegistry>, chunks: Arc<dyn ChunkStore>) -> Self {
        Self { registry, chunks }
    }

    pub async fn run(&self, id: &str) -> Result<()> {
        let doc = self.registry.find_by_id(id).await?;
        self.remove_doc(&doc).await
    }

    /// Sweep every upload whose expiry time is at or before `now`.
    /// Returns the number of uploads removed; a failure on one upload is
    /// logged and does not abort the sweep.
    pub async fn run_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.registry.expired(now).await?;
        let mut removed = 0;

        for doc in expired {
            match self.remove_doc(&doc).await {
                Ok(()) => {
                    tracing::info!(
                        "removed expired upload: id={} expires={}",
                        doc.id,
                        doc.expires
                    );
                    removed += 1;
                }
                // Another sweeper finished this one first.
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    tracing::warn!("failed to remove expired upload {}: {}", doc.id, error);
                }
            }
        }

        Ok(removed)
    }

    async fn remove_doc(&self, doc: &UploadDoc) -> Result<()> {
        for (n, slot) in doc.parts.iter().enumerate() {
            if slot.is_none() {
                continue;
            }
            let chunk_name = format!("{}/{}", doc.id, n);
            if self.chunks.chunk_exists(&chunk_name).await? {
                self.chunks.remove_chunk(&chunk_name).await?;
            }
        }
        self.registry.delete_by_id(&doc.id).await
    }
}
