use crate::config::UploadLimits;
use crate::error::{Result, SiltError};
use crate::hash::{hex_digest, new_hash};
use crate::registry::UploadRegistry;
use crate::storage::{ChunkStore, MultipartIndex};
use sha2::Digest;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Client-asserted part list handed to finalize, one entry per part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub hash: String,
}

impl Part {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

/// Validates the full part list of an upload and computes the whole-blob
/// hash by restreaming the parts from the chunk store.
///
/// The operation mutates nothing, so repeating it with the same
/// arguments returns an equal index and hash.
pub struct FinishUploadOperation {
    registry: Arc<dyn UploadRegistry>,
    chunks: Arc<dyn ChunkStore>,
    limits: UploadLimits,
}

impl FinishUploadOperation {
    pub fn new(
        registry: Arc<dyn UploadRegistry>,
        chunks: Arc<dyn ChunkStore>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            registry,
            chunks,
            limits,
        }
    }

    pub async fn run(&self, id: &str, parts: &[Part]) -> Result<(MultipartIndex, String)> {
        let doc = self.registry.find_by_id(id).await?;

        // The comparison is against the length of the parts sequence
        // (highest touched slot + 1): a hole below the highest slot is a
        // not-uploaded part, not a count mismatch.
        if parts.len() != doc.parts.len() {
            return Err(SiltError::PartCountMismatch {
                got: parts.len(),
                uploaded: doc.parts.len(),
            });
        }

        let mut sizes = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let number = i as u32;
            let record = match doc.parts[i].as_ref() {
                Some(record) if record.complete => record,
                _ => return Err(SiltError::PartNotUploaded { number }),
            };
            if record.hash != part.hash {
                return Err(SiltError::FinishHashMismatch {
                    index: number,
                    got: part.hash.clone(),
                    want: record.hash.clone(),
                });
            }
            sizes.push(record.size);
        }

        for (i, &size) in sizes
            .iter()
            .enumerate()
            .take(sizes.len().saturating_sub(1))
        {
            if size < self.limits.min_part_size {
                return Err(SiltError::ExistingPartTooSmall {
                    number: i as u32,
                    need: self.limits.min_part_size,
                    got: size,
                });
            }
        }

        // The final hash covers the concatenated part bytes, not the part
        // hashes, so every part is restreamed.
        let mut hasher = new_hash();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        for i in 0..parts.len() {
            let (mut reader, _) = self.chunks.open_chunk(&format!("{}/{}", id, i)).await?;
            loop {
                let read = reader.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
            }
        }
        let hash = hex_digest(hasher);

        // The expiry sweeper may have removed the upload while the hash
        // was being computed, in which case the chunks just streamed are
        // not trustworthy.
        match self.registry.find_by_id(id).await {
            Ok(_) => {}
            Err(error) if error.is_not_found() => return Err(SiltError::UploadRemoved),
            Err(error) => return Err(error),
        }

        let sizes = sizes
            .into_iter()
            .map(|size| {
                u32::try_from(size)
                    .map_err(|_| SiltError::Internal(format!("part size {} overflows index", size)))
            })
            .collect::<Result<Vec<u32>>>()?;

        tracing::debug!("upload finished: id={} parts={}", id, sizes.len());
        Ok((MultipartIndex { sizes }, hash))
    }
}
