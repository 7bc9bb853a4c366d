//! In-process checkpoint store

use super::{CheckpointError, CheckpointMetadata, CheckpointStore};

/// Checkpoint store kept in memory, counting writes so callers can observe commits
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Option<i64>,
    metadata: CheckpointMetadata,
    writes: usize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding a resume point
    pub fn with_checkpoint(last_committed_end: i64, total: f64) -> Self {
        Self {
            state: Some(last_committed_end),
            metadata: CheckpointMetadata { total },
            writes: 0,
        }
    }

    /// Number of `set_state` calls seen
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get_state(&self) -> Result<Option<i64>, CheckpointError> {
        Ok(self.state)
    }

    fn get_metadata(&self) -> Result<CheckpointMetadata, CheckpointError> {
        Ok(self.metadata)
    }

    fn set_state(&mut self, last_committed_end: i64) -> Result<(), CheckpointError> {
        self.state = Some(last_committed_end);
        self.writes += 1;
        Ok(())
    }

    fn set_metadata(&mut self, metadata: &CheckpointMetadata) -> Result<(), CheckpointError> {
        self.metadata = *metadata;
        Ok(())
    }
}
