use relic_core::config::CatalogConfig;
use relic_core::error::StateError;
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

/// Open a catalog connection with default pragmas.
pub fn open_connection(db_path: &Path) -> Result<Connection, StateError> {
    open_connection_with_config(db_path, 5000, -64000)
}

/// Open a catalog connection using the `[catalog]` section of the configuration.
pub fn open_from_config(db_path: &Path, config: &CatalogConfig) -> Result<Connection, StateError> {
    open_connection_with_config(db_path, config.busy_timeout_ms, config.cache_size)
}

/// Open a catalog connection with configurable pragmas.
pub fn open_connection_with_config(
    db_path: &Path,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<Connection, StateError> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(StateError::Io)?;
    }

    let conn = Connection::open(db_path).map_err(StateError::sqlite)?;
    apply_pragmas(&conn, busy_timeout_ms, cache_size)?;

    debug!(?db_path, "Catalog connection opened");
    Ok(conn)
}

fn apply_pragmas(
    conn: &Connection,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<(), StateError> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};
         PRAGMA cache_size = {};",
        busy_timeout_ms, cache_size
    ))
    .map_err(StateError::sqlite)?;
    Ok(())
}

/// Run SQLite quick_check to verify catalog integrity.
/// Returns Ok(true) if healthy, Ok(false) with error detail otherwise.
pub fn check_sqlite_health(conn: &Connection) -> Result<(bool, Option<String>), StateError> {
    let result: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(StateError::sqlite)?;

    if result == "ok" {
        Ok((true, None))
    } else {
        Ok((false, Some(result)))
    }
}
