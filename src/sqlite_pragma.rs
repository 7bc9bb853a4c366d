//! Shared SQLite connection tuning

use rusqlite::Connection;
use std::time::Duration;

/// Apply WAL journaling and relaxed sync to a freshly opened connection
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Open `db_path`, creating its parent directory first
pub fn open_database(db_path: &std::path::Path) -> Result<Connection, String> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                format!("Failed to create database directory {}: {}", parent.display(), e)
            })?;
        }
    }

    let conn = Connection::open(db_path).map_err(|e| e.to_string())?;
    apply_optimized_pragmas(&conn).map_err(|e| e.to_string())?;
    Ok(conn)
}
