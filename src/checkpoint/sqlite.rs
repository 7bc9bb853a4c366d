//! SQLite-backed checkpoint store, one row per identity

use super::{CheckpointError, CheckpointMetadata, CheckpointStore};
use crate::sqlite_pragma::open_database;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteCheckpointStore {
    conn: Connection,
    identity: String,
}

impl SqliteCheckpointStore {
    pub fn new(db_path: impl AsRef<Path>, identity: &str) -> Result<Self, CheckpointError> {
        let conn = open_database(db_path.as_ref()).map_err(CheckpointError::Database)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                identity TEXT PRIMARY KEY,
                last_committed_end INTEGER,
                total REAL NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        log::info!("✅ Checkpoint store ready for {} at {}", identity, db_path.as_ref().display());

        Ok(Self {
            conn,
            identity: identity.to_string(),
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn upsert_state(conn: &Connection, identity: &str, end: i64) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO checkpoints (identity, last_committed_end, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                last_committed_end = excluded.last_committed_end,
                updated_at = excluded.updated_at",
            params![identity, end, Self::now()],
        )
    }

    fn upsert_metadata(conn: &Connection, identity: &str, total: f64) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO checkpoints (identity, total, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                total = excluded.total,
                updated_at = excluded.updated_at",
            params![identity, total, Self::now()],
        )
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get_state(&self) -> Result<Option<i64>, CheckpointError> {
        let end: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT last_committed_end FROM checkpoints WHERE identity = ?1",
                params![self.identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(end.flatten())
    }

    fn get_metadata(&self) -> Result<CheckpointMetadata, CheckpointError> {
        let total: Option<f64> = self
            .conn
            .query_row(
                "SELECT total FROM checkpoints WHERE identity = ?1",
                params![self.identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(CheckpointMetadata {
            total: total.unwrap_or(0.0),
        })
    }

    fn set_state(&mut self, last_committed_end: i64) -> Result<(), CheckpointError> {
        Self::upsert_state(&self.conn, &self.identity, last_committed_end)?;
        Ok(())
    }

    fn set_metadata(&mut self, metadata: &CheckpointMetadata) -> Result<(), CheckpointError> {
        Self::upsert_metadata(&self.conn, &self.identity, metadata.total)?;
        Ok(())
    }

    fn record_commit(
        &mut self,
        last_committed_end: i64,
        metadata: &CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let tx = self.conn.transaction()?;
        Self::upsert_state(&tx, &self.identity, last_committed_end)?;
        Self::upsert_metadata(&tx, &self.identity, metadata.total)?;
        tx.commit()?;

        log::debug!(
            "✅ Checkpoint for {} advanced to {} (total {:.4})",
            self.identity,
            last_committed_end,
            metadata.total
        );
        Ok(())
    }
}
