mod sqlite;

pub use sqlite::SqliteUploadRegistry;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-part metadata inside an upload document. `complete` turns true
/// only after the bytes are stored and their digest matched `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub hash: String,
    pub size: u64,
    pub complete: bool,
}

/// One in-progress multipart upload. `parts` is dense up to the highest
/// part number ever touched; slots never written are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadDoc {
    pub id: String,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub parts: Vec<Option<PartRecord>>,
}

impl UploadDoc {
    /// Slot `n`, if it has ever been written.
    pub fn part(&self, n: u32) -> Option<&PartRecord> {
        self.parts.get(n as usize).and_then(|slot| slot.as_ref())
    }

    /// Index of the highest occupied slot.
    pub fn highest_part(&self) -> Option<u32> {
        self.parts
            .iter()
            .rposition(|slot| slot.is_some())
            .map(|index| index as u32)
    }
}

/// Expected shape of a slot before a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPrecondition {
    /// Slot absent, or present but never written.
    Empty,
    /// Slot holds an incomplete record with this hash and size.
    Pending { hash: String, size: u64 },
    /// Slot holds a complete record with this hash and size.
    Complete { hash: String, size: u64 },
}

impl SlotPrecondition {
    pub fn holds_for(&self, current: Option<&PartRecord>) -> bool {
        match (self, current) {
            (SlotPrecondition::Empty, None) => true,
            (SlotPrecondition::Pending { hash, size }, Some(record)) => {
                !record.complete && record.hash == *hash && record.size == *size
            }
            (SlotPrecondition::Complete { hash, size }, Some(record)) => {
                record.complete && record.hash == *hash && record.size == *size
            }
            _ => false,
        }
    }
}

/// Keyed persistence for upload documents.
///
/// The conditional slot update is the single serialization point for
/// concurrent part writers; implementations must not rely on in-process
/// locking, since several processes may share one registry.
#[async_trait]
pub trait UploadRegistry: Send + Sync {
    /// Persist a new document. A duplicate id is an error.
    async fn insert(&self, doc: &UploadDoc) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<UploadDoc>;

    /// Conditionally write slot `n`, growing the part list with `None`
    /// holes as needed. Fails with the `SlotConflict` sentinel when the
    /// slot no longer matches `precondition`, so the caller can re-read
    /// and retry.
    async fn update_part_slot(
        &self,
        id: &str,
        n: u32,
        record: PartRecord,
        precondition: SlotPrecondition,
    ) -> Result<()>;

    async fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Documents whose expiry time is at or before `now`.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<UploadDoc>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, size: u64, complete: bool) -> PartRecord {
        PartRecord {
            hash: hash.to_string(),
            size,
            complete,
        }
    }

    #[test]
    fn test_highest_part_skips_holes() {
        let doc = UploadDoc {
            id: "u".to_string(),
            expires: Utc::now(),
            parts: vec![None, Some(record("h", 1, false)), None],
        };
        assert_eq!(doc.highest_part(), Some(1));
        assert!(doc.part(0).is_none());
        assert!(doc.part(1).is_some());
        assert!(doc.part(7).is_none());
    }

    #[test]
    fn test_precondition_shapes() {
        let pending = record("h", 10, false);
        let complete = record("h", 10, true);

        assert!(SlotPrecondition::Empty.holds_for(None));
        assert!(!SlotPrecondition::Empty.holds_for(Some(&pending)));

        let want_pending = SlotPrecondition::Pending {
            hash: "h".to_string(),
            size: 10,
        };
        assert!(want_pending.holds_for(Some(&pending)));
        assert!(!want_pending.holds_for(Some(&complete)));
        assert!(!want_pending.holds_for(None));

        let want_complete = SlotPrecondition::Complete {
            hash: "h".to_string(),
            size: 10,
        };
        assert!(want_complete.holds_for(Some(&complete)));
        assert!(!want_complete.holds_for(Some(&pending)));
    }
}
