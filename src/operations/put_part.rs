use crate::config::UploadLimits;
use crate::error::{Result, SiltError};
use crate::registry::{PartRecord, SlotPrecondition, UploadDoc, UploadRegistry};
use crate::storage::ChunkStore;
use std::sync::Arc;
use tokio::io::AsyncRead;

const MAX_SLOT_ATTEMPTS: usize = 10;

/// Streams one part of a multipart upload into the chunk store and
/// records it in the upload document.
///
/// All coordination with concurrent writers of the same upload goes
/// through the registry's conditional slot updates: the slot is reserved
/// before any bytes move and marked complete only after the stored bytes
/// matched the asserted hash.
pub struct PutPartOperation {
    registry: Arc<dyn UploadRegistry>,
    chunks: Arc<dyn ChunkStore>,
    limits: UploadLimits,
}

impl PutPartOperation {
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

    pub async fn run(
        &self,
        id: &str,
        n: u32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        hash: &str,
    ) -> Result<()> {
        if n >= self.limits.max_parts {
            return Err(SiltError::PartNumberTooBig {
                number: n,
                maximum: self.limits.max_parts - 1,
            });
        }
        if size == 0 {
            return Err(SiltError::PartSizeNonPositive { number: n, size });
        }
        if size > self.limits.max_part_size {
            return Err(SiltError::PartTooBig {
                number: n,
                maximum: self.limits.max_part_size,
            });
        }

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let doc = self.registry.find_by_id(id).await?;

            if let Some(record) = doc.part(n) {
                if record.complete {
                    if record.hash == hash {
                        // Idempotent retry; the bytes are already stored.
                        return Ok(());
                    }
                    return Err(SiltError::CompletedPartHashMismatch);
                }
            }

            self.check_part_sizes(&doc, n, size)?;

            // Reserve the slot before touching bytes so racing writers
            // serialize through the registry.
            let reserve_precondition = match doc.part(n) {
                None => SlotPrecondition::Empty,
                Some(record) => SlotPrecondition::Pending {
                    hash: record.hash.clone(),
                    size: record.size,
                },
            };
            let pending = PartRecord {
                hash: hash.to_string(),
                size,
                complete: false,
            };
            match self
                .registry
                .update_part_slot(id, n, pending, reserve_precondition)
                .await
            {
                Ok(()) => {}
                Err(SiltError::SlotConflict) => continue,
                Err(error) => return Err(error),
            }

            let chunk_name = format!("{}/{}", id, n);
            match self
                .chunks
                .put_chunk(&chunk_name, reader, size, hash)
                .await
            {
                Ok(()) => {}
                Err(SiltError::HashMismatch) => {
                    // The slot stays pending; a retry with matching bytes
                    // takes the reserve path again.
                    return Err(SiltError::PartHashMismatch { name: chunk_name });
                }
                Err(error) => return Err(error),
            }

            let complete = PartRecord {
                hash: hash.to_string(),
                size,
                complete: true,
            };
            let precondition = SlotPrecondition::Pending {
                hash: hash.to_string(),
                size,
            };
            match self
                .registry
                .update_part_slot(id, n, complete, precondition)
                .await
            {
                Ok(()) => {
                    tracing::debug!("part uploaded: upload={} part={} size={}", id, n, size);
                    return Ok(());
                }
                Err(SiltError::SlotConflict) => {
                    // The reader is consumed, so resolve the race from the
                    // document instead of restarting.
                    return self.resolve_completion_race(id, n, hash).await;
                }
                Err(error) => return Err(error),
            }
        }

        Err(SiltError::UploadContention { id: id.to_string() })
    }

    /// A racing writer touched the slot between our byte upload and the
    /// completion update. If it completed the slot with our hash the part
    /// is stored and this call succeeded; with another hash the client
    /// sent inconsistent data for the part.
    async fn resolve_completion_race(&self, id: &str, n: u32, hash: &str) -> Result<()> {
        let doc = self.registry.find_by_id(id).await?;
        match doc.part(n) {
            Some(record) if record.complete && record.hash == hash => Ok(()),
            Some(record) if record.complete => Err(SiltError::CompletedPartHashMismatch),
            _ => Err(SiltError::UploadContention { id: id.to_string() }),
        }
    }

    /// Every part except the highest-numbered one must meet the minimum
    /// size. Out-of-order uploads re-evaluate as parts arrive: the
    /// incoming part is rejected when a higher slot already exists, and
    /// an existing part is rejected when this write makes it
    /// non-terminal.
    fn check_part_sizes(&self, doc: &UploadDoc, n: u32, size: u64) -> Result<()> {
        let min = self.limits.min_part_size;
        let highest = doc.highest_part();

        if let Some(highest) = highest {
            if n < highest && size < min {
                return Err(SiltError::PartTooSmall {
                    need: min,
                    got: size,
                });
            }
        }

        let new_highest = highest.map_or(n, |h| h.max(n));
        for (i, slot) in doc.parts.iter().enumerate() {
            let i = i as u32;
            if i >= new_highest {
                break;
            }
            if i == n {
                continue;
            }
            if let Some(record) = slot {
                if record.size < min {
                    return Err(SiltError::ExistingPartTooSmall {
                        number: i,
                        need: min,
                        got: record.size,
                    });
                }
            }
        }

        Ok(())
    }
}
