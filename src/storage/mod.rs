mod fs;

pub use fs::FsChunkStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// Streaming handle over a chunk's bytes.
pub type ChunkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Ordered part sizes of a finished multipart blob. The opener uses the
/// sizes to stitch the `"<id>/<n>"` chunks into one logical stream.
///
/// Sizes are `u32`, so a single part larger than 4 GiB is not
/// representable; the per-part size ceiling keeps real parts far below
/// this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartIndex {
    pub sizes: Vec<u32>,
}

/// Opaque storage for named byte chunks.
///
/// A successful `put_chunk` is durable and a failed one leaves no
/// visible chunk. Overwriting an existing chunk is permitted, so retries
/// of an interrupted write are safe.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Stream `size` bytes from `reader` into a chunk called `name`,
    /// computing the digest along the way. A digest or length mismatch
    /// removes the partial write and fails with `hash mismatch`.
    async fn put_chunk(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        hash: &str,
    ) -> Result<()>;

    /// Open a chunk for streaming, returning the reader and byte length.
    async fn open_chunk(&self, name: &str) -> Result<(ChunkReader, u64)>;

    /// Delete a chunk. Absence is reported as not-found.
    async fn remove_chunk(&self, name: &str) -> Result<()>;

    async fn chunk_exists(&self, name: &str) -> Result<bool>;
}
