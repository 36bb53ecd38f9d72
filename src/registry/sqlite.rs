use crate::error::{Result, SiltError};
use crate::registry::{PartRecord, SlotPrecondition, UploadDoc, UploadRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::time::Duration;

/// Upload registry over a local SQLite database, one row per upload.
///
/// The conditional slot update runs inside an IMMEDIATE transaction, so
/// concurrent writers (including other processes sharing the database
/// file) serialize on the row and stale preconditions surface as
/// `SlotConflict`.
pub struct SqliteUploadRegistry {
    db_path: PathBuf,
}

impl SqliteUploadRegistry {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = Self { db_path };
        registry.init_schema()?;
        Ok(registry)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                expires TEXT NOT NULL,
                parts TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )?;

        Ok(())
    }
}

#[async_trait]
impl UploadRegistry for SqliteUploadRegistry {
    async fn insert(&self, doc: &UploadDoc) -> Result<()> {
        let conn = self.get_conn()?;
        let parts = serde_json::to_string(&doc.parts)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO uploads (id, expires, parts) VALUES (?1, ?2, ?3)",
            params![doc.id, doc.expires.to_rfc3339(), parts],
        )?;
        if inserted == 0 {
            return Err(SiltError::UploadExists {
                id: doc.id.clone(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<UploadDoc> {
        let conn = self.get_conn()?;

        let row = conn
            .query_row(
                "SELECT id, expires, parts FROM uploads WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, expires, parts)) => decode_doc(id, &expires, &parts),
            None => Err(SiltError::UploadNotFound { id: id.to_string() }),
        }
    }

    async fn update_part_slot(
        &self,
        id: &str,
        n: u32,
        record: PartRecord,
        precondition: SlotPrecondition,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let parts_json: Option<String> = tx
            .query_row(
                "SELECT parts FROM uploads WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(parts_json) = parts_json else {
            return Err(SiltError::UploadNotFound { id: id.to_string() });
        };

        let mut parts: Vec<Option<PartRecord>> = serde_json::from_str(&parts_json)?;
        if !precondition.holds_for(parts.get(n as usize).and_then(|slot| slot.as_ref())) {
            return Err(SiltError::SlotConflict);
        }

        if parts.len() <= n as usize {
            parts.resize(n as usize + 1, None);
        }
        parts[n as usize] = Some(record);

        tx.execute(
            "UPDATE uploads SET parts = ?1 WHERE id = ?2",
            params![serde_json::to_string(&parts)?, id],
        )?;
        tx.commit()?;

        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let conn = self.get_conn()?;

        let deleted = conn.execute("DELETE FROM uploads WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(SiltError::UploadNotFound { id: id.to_string() });
        }

        Ok(())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<UploadDoc>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id, expires, parts FROM uploads")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, expires, parts) = row?;
            let doc = decode_doc(id, &expires, &parts)?;
            if doc.expires <= now {
                docs.push(doc);
            }
        }

        Ok(docs)
    }
}

fn decode_doc(id: String, expires: &str, parts: &str) -> Result<UploadDoc> {
    let expires = DateTime::parse_from_rfc3339(expires)
        .map_err(|error| SiltError::Internal(format!("invalid RFC3339 expiry: {}", error)))?
        .with_timezone(&Utc);
    let parts: Vec<Option<PartRecord>> = serde_json::from_str(parts)?;

    Ok(UploadDoc { id, expires, parts })
}
