//! In-memory checkpoint store, for tests and embedding.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::traits::{Checkpoint, CheckpointStore};

/// Keeps the checkpoint in process memory and counts writes.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    checkpoint: Option<Checkpoint>,
    writes: usize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing checkpoint.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            inner: Mutex::new(Inner {
                checkpoint: Some(checkpoint),
                writes: 0,
            }),
        }
    }

    /// Current checkpoint, without going through the async trait.
    pub fn snapshot(&self) -> Option<Checkpoint> {
        self.lock().checkpoint.clone()
    }

    /// Number of `put` calls so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the data is
        // still a whole Option<Checkpoint>.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self) -> Result<Option<Checkpoint>, DatabaseError> {
        Ok(self.lock().checkpoint.clone())
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        let mut inner = self.lock();
        inner.checkpoint = Some(checkpoint.clone());
        inner.writes += 1;
        Ok(())
    }
}
