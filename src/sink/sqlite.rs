//! SQLite sink - one row per (window, service)

use super::{SinkError, WindowSink};
use crate::sqlite_pragma::open_database;
use crate::usage::UsageMap;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct SqliteSink {
    conn: Connection,
    identity: String,
}

impl SqliteSink {
    pub fn new(db_path: impl AsRef<Path>, identity: &str) -> Result<Self, SinkError> {
        let conn = open_database(db_path.as_ref()).map_err(SinkError::Database)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS window_usage (
                identity TEXT NOT NULL,
                window_begin INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                service TEXT NOT NULL,
                entries TEXT NOT NULL,
                entry_count INTEGER NOT NULL,
                subtotal REAL NOT NULL,
                PRIMARY KEY (identity, window_begin, service)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_window_usage_begin ON window_usage(identity, window_begin DESC)",
            [],
        )?;

        log::info!("✅ SQLite sink initialized at {}", db_path.as_ref().display());

        Ok(Self {
            conn,
            identity: identity.to_string(),
        })
    }
}

impl WindowSink for SqliteSink {
    fn append(&mut self, usage: &UsageMap, start: i64, end: i64) -> Result<(), SinkError> {
        let tx = self.conn.transaction()?;

        for (service, entries) in usage {
            let subtotal: f64 = entries.iter().filter_map(|e| e.price()).sum();
            tx.execute(
                "INSERT OR IGNORE INTO window_usage
                 (identity, window_begin, window_end, service, entries, entry_count, subtotal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.identity,
                    start,
                    end,
                    service,
                    serde_json::to_string(entries)?,
                    entries.len() as i64,
                    subtotal,
                ],
            )?;
        }

        tx.commit()?;

        log::debug!(
            "✅ Window {}..{} written for {} ({} services)",
            start,
            end,
            self.identity,
            usage.len()
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        log::info!("Closed SQLite sink for {}", self.identity);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "SQLite"
    }
}
