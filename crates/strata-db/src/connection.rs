use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use strata_common::{Error, Result};
use strata_config::DatabaseConfig;
use tracing::info;

/// Open the database described by `config`, creating parent directories for
/// on-disk files. A path of `:memory:` opens an in-memory database.
pub fn open_configured(config: &DatabaseConfig) -> Result<Connection> {
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    if config.path == Path::new(":memory:") {
        let conn = open_in_memory()?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        return Ok(conn);
    }

    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    open(&config.path, busy_timeout)
}

pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}
