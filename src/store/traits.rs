//! `CheckpointStore` trait: read and overwrite the sync progress record.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// Fixed key of the singleton checkpoint row.
pub const CHECKPOINT_KEY: &str = "settings";

/// Sync progress for one mailbox.
///
/// Every UID below `next_uid` has been handled within the `uid_validity`
/// epoch of the mailbox identified by `mailbox_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Smallest UID not yet confirmed processed.
    pub next_uid: u32,
    /// UIDVALIDITY of the folder when the checkpoint was written.
    pub uid_validity: u32,
    /// Fingerprint of (host, user, folder).
    pub mailbox_hash: String,
    /// Milliseconds since the Unix epoch of the last write. Informational.
    pub timestamp: i64,
}

impl Checkpoint {
    /// Build a checkpoint stamped with the current time.
    pub fn now(next_uid: u32, uid_validity: u32, mailbox_hash: impl Into<String>) -> Self {
        Self {
            next_uid,
            uid_validity,
            mailbox_hash: mailbox_hash.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Storage for the singleton checkpoint.
///
/// There is no merge and no optimistic concurrency: invocations never
/// overlap, so the last writer is the only writer.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch the checkpoint. `None` means no run has ever completed.
    async fn get(&self) -> Result<Option<Checkpoint>, DatabaseError>;

    /// Replace the checkpoint.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), DatabaseError>;
}
