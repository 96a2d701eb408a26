use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use warden_types::{WardenError, WardenResult};

/// Opens a SQLite connection configured for a single-writer, many-reader
/// embedded workload: WAL journaling so readers never block the writer, a
/// busy timeout so concurrent writers retry instead of erroring, and the
/// schema for the given component.
pub fn open(db_path: &Path, init_schema: impl FnOnce(&Connection) -> rusqlite::Result<()>) -> WardenResult<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WardenError::persistence(e.to_string()))?;
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(10))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute("PRAGMA synchronous = NORMAL", [])?;

    init_schema(&conn)?;
    Ok(conn)
}
