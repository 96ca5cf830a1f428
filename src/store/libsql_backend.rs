//! libSQL backend: async `CheckpointStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{CHECKPOINT_KEY, Checkpoint, CheckpointStore};

/// libSQL checkpoint store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlCheckpointStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCheckpointStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Checkpoint database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Narrow a stored INTEGER back to a UID-sized value.
fn column_u32(row: &libsql::Row, idx: i32, name: &str) -> Result<u32, DatabaseError> {
    let value: i64 = row
        .get(idx)
        .map_err(|e| DatabaseError::Corrupt(format!("{name}: {e}")))?;
    u32::try_from(value).map_err(|_| DatabaseError::Corrupt(format!("{name} out of range: {value}")))
}

fn row_to_checkpoint(row: &libsql::Row) -> Result<Checkpoint, DatabaseError> {
    Ok(Checkpoint {
        next_uid: column_u32(row, 0, "next_uid")?,
        uid_validity: column_u32(row, 1, "uid_validity")?,
        mailbox_hash: row
            .get(2)
            .map_err(|e| DatabaseError::Corrupt(format!("mailbox_hash: {e}")))?,
        timestamp: row
            .get(3)
            .map_err(|e| DatabaseError::Corrupt(format!("timestamp: {e}")))?,
    })
}

#[async_trait]
impl CheckpointStore for LibSqlCheckpointStore {
    async fn get(&self) -> Result<Option<Checkpoint>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT next_uid, uid_validity, mailbox_hash, timestamp
                 FROM checkpoints WHERE id = ?1",
                params![CHECKPOINT_KEY],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get checkpoint: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_checkpoint(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get checkpoint: {e}"))),
        }
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO checkpoints (id, next_uid, uid_validity, mailbox_hash, timestamp, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
                 ON CONFLICT (id) DO UPDATE SET
                    next_uid = ?2, uid_validity = ?3, mailbox_hash = ?4,
                    timestamp = ?5, updated_at = datetime('now')",
                params![
                    CHECKPOINT_KEY,
                    i64::from(checkpoint.next_uid),
                    i64::from(checkpoint.uid_validity),
                    checkpoint.mailbox_hash.as_str(),
                    checkpoint.timestamp
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put checkpoint: {e}")))?;

        debug!(
            next_uid = checkpoint.next_uid,
            uid_validity = checkpoint.uid_validity,
            "Checkpoint saved"
        );
        Ok(())
    }
}
