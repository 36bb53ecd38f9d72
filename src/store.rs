use crate::config::{StoreConfig, UploadLimits};
use crate::error::Result;
use crate::operations::{FinishUploadOperation, Part, PutPartOperation, RemoveUploadOperation};
use crate::registry::{SqliteUploadRegistry, UploadDoc, UploadRegistry};
use crate::storage::{ChunkReader, ChunkStore, FsChunkStore, MultipartIndex};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Content-addressed blob store with resumable multipart uploads.
///
/// Small blobs go through `put`/`open`/`remove` in one call. Large blobs
/// are streamed in parts (out of order, from many workers) under an
/// upload id, then finalized into a `MultipartIndex` that `open` uses to
/// stitch the parts back into one logical stream.
///
/// Every long-running call streams through the chunk store and is safe
/// to abandon: a dropped part upload leaves at most a temp file and an
/// incomplete slot, both of which a retry replaces. Deadlines compose
/// from outside with `tokio::time::timeout`.
pub struct Store {
    chunks: Arc<dyn ChunkStore>,
    registry: Arc<dyn UploadRegistry>,
    limits: UploadLimits,
}

impl Store {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        registry: Arc<dyn UploadRegistry>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            chunks,
            registry,
            limits,
        }
    }

    /// Builds a store over the local filesystem and SQLite backends
    /// rooted at the configured data directory.
    pub fn open_config(config: &StoreConfig) -> Result<Self> {
        let chunks = FsChunkStore::new(config.data_dir.clone())?;
        let registry = SqliteUploadRegistry::new(config.data_dir.join("uploads.db"))?;
        Ok(Self::new(
            Arc::new(chunks),
            Arc::new(registry),
            config.limits.clone(),
        ))
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Store `size` bytes from `reader` as the blob `name`, verifying
    /// them against `hash`. An existing blob with the same name is
    /// replaced.
    pub async fn put<R>(&self, reader: &mut R, name: &str, size: u64, hash: &str) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.chunks.put_chunk(name, reader, size, hash).await
    }

    /// Open a blob for streaming, returning the reader and byte length.
    /// With an index, `name` is the id of a finished multipart blob and
    /// the component chunks are stitched in order.
    pub async fn open(
        &self,
        name: &str,
        index: Option<&MultipartIndex>,
    ) -> Result<(ChunkReader, u64)> {
        let Some(index) = index else {
            return self.chunks.open_chunk(name).await;
        };

        let mut length = 0u64;
        let mut reader: ChunkReader = Box::new(tokio::io::empty());
        for (n, &size) in index.sizes.iter().enumerate() {
            let (part_reader, _) = self.chunks.open_chunk(&format!("{}/{}", name, n)).await?;
            reader = Box::new(reader.chain(part_reader));
            length += size as u64;
        }
        Ok((reader, length))
    }

    /// Remove a blob; with an index, remove every component chunk.
    pub async fn remove(&self, name: &str, index: Option<&MultipartIndex>) -> Result<()> {
        let Some(index) = index else {
            return self.chunks.remove_chunk(name).await;
        };

        for n in 0..index.sizes.len() {
            self.chunks.remove_chunk(&format!("{}/{}", name, n)).await?;
        }
        Ok(())
    }

    /// Create a multipart upload that may be garbage-collected after
    /// `expires`. Returns the new upload id.
    pub async fn new_upload(&self, expires: DateTime<Utc>) -> Result<String> {
        let id = ulid::Ulid::new().to_string();
        let doc = UploadDoc {
            id: id.clone(),
            expires,
            parts: Vec::new(),
        };
        self.registry.insert(&doc).await?;
        tracing::debug!("created upload: id={} expires={}", id, expires);
        Ok(id)
    }

    /// Upload one part of an upload. Parts may arrive out of order and
    /// concurrently; a retry with the same hash is idempotent.
    pub async fn put_part<R>(
        &self,
        id: &str,
        n: u32,
        reader: &mut R,
        size: u64,
        hash: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        PutPartOperation::new(self.registry.clone(), self.chunks.clone(), self.limits.clone())
            .run(id, n, reader, size, hash)
            .await
    }

    /// Validate the client's part list against the upload and return the
    /// multipart index plus the hash of the concatenated part bytes.
    pub async fn finish_upload(&self, id: &str, parts: &[Part]) -> Result<(MultipartIndex, String)> {
        FinishUploadOperation::new(self.registry.clone(), self.chunks.clone(), self.limits.clone())
            .run(id, parts)
            .await
    }

    /// Delete an upload document and all part chunks it refers to.
    pub async fn remove_upload(&self, id: &str) -> Result<()> {
        RemoveUploadOperation::new(self.registry.clone(), self.chunks.clone())
            .run(id)
            .await
    }

    /// Sweep every upload whose expiry time has passed, returning the
    /// number removed.
    pub async fn remove_expired_uploads(&self, now: DateTime<Utc>) -> Result<usize> {
        RemoveUploadOperation::new(self.registry.clone(), self.chunks.clone())
            .run_expired(now)
            .await
    }
}
