//! Checkpoint Store contract - resume point after the last committed window

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use serde::{Deserialize, Serialize};

/// Metadata persisted alongside the last committed window end
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Cumulative price of every entry merged so far
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub last_committed_end: i64,
    pub cumulative_total: f64,
}

#[derive(Debug)]
pub enum CheckpointError {
    Database(String),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        CheckpointError::Database(err.to_string())
    }
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// Durable store for one identity's resume point.
///
/// The aggregator writes it once per successful commit, after the archive
/// write and the pipeline fan-out.
pub trait CheckpointStore {
    /// End of the last committed window, `None` before the first commit
    fn get_state(&self) -> Result<Option<i64>, CheckpointError>;

    fn get_metadata(&self) -> Result<CheckpointMetadata, CheckpointError>;

    fn set_state(&mut self, last_committed_end: i64) -> Result<(), CheckpointError>;

    fn set_metadata(&mut self, metadata: &CheckpointMetadata) -> Result<(), CheckpointError>;

    /// Persist a finished commit. Stores with transactions should override this.
    fn record_commit(
        &mut self,
        last_committed_end: i64,
        metadata: &CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        self.set_state(last_committed_end)?;
        self.set_metadata(metadata)
    }

    fn checkpoint(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(last_committed_end) = self.get_state()? else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            last_committed_end,
            cumulative_total: self.get_metadata()?.total,
        }))
    }
}
