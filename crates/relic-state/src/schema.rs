use relic_core::error::StateError;
use rusqlite::Connection;
use tracing::debug;

/// Current schema version. Bump this when adding a new migration step.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Create all catalog tables and run any pending migrations.
pub fn create_tables(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(SCHEMA_SQL).map_err(StateError::sqlite)?;
    migrate(conn)?;
    debug!("Catalog schema ready (version {})", CURRENT_SCHEMA_VERSION);
    Ok(())
}

/// Version recorded in `schema_migrations`, or 0 for an uninitialised catalog.
pub fn current_version(conn: &Connection) -> Result<u32, StateError> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;
    if !exists {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

/// Fail with `SchemaMigrationRequired` unless the catalog is at the current version.
pub fn ensure_current(conn: &Connection) -> Result<(), StateError> {
    let current = current_version(conn)?;
    if current != CURRENT_SCHEMA_VERSION {
        return Err(StateError::SchemaMigrationRequired {
            current,
            required: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Run incremental schema migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn migrate(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(StateError::sqlite)?;

    let current = current_version(conn)?;

    type MigrationFn = fn(&Connection) -> Result<(), StateError>;

    // Index 0 = V1. V1 is the baseline created by SCHEMA_SQL.
    let migrations: &[MigrationFn] = &[|_conn| Ok(())];

    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        let idx = (version - 1) as usize;
        if idx < migrations.len() {
            migrations[idx](conn)?;
        }
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(StateError::sqlite)?;
        debug!(version, "Applied schema migration");
    }

    Ok(())
}

// Derived tables reference raw_artifacts without a cascading foreign key:
// deletion order is owned by the sweep.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    background INTEGER NOT NULL DEFAULT 0,
    footprint TEXT,
    min_z REAL,
    max_z REAL,
    z_points INTEGER
);

CREATE TABLE IF NOT EXISTS raw_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    artifact_type TEXT NOT NULL,
    abs_path TEXT NOT NULL UNIQUE,
    last_mod INTEGER NOT NULL,
    last_check INTEGER NOT NULL,
    srid INTEGER,
    color_8bit INTEGER NOT NULL DEFAULT 0,
    current INTEGER NOT NULL DEFAULT 0,
    thumbnail INTEGER NOT NULL DEFAULT 0,
    num_points INTEGER,
    extension TEXT,
    min_x REAL,
    min_y REAL,
    min_z REAL,
    max_x REAL,
    max_y REAL,
    max_z REAL,
    obj_file TEXT,
    mtl_file TEXT,
    ply_file TEXT,
    x REAL,
    y REAL,
    z REAL,
    dx REAL,
    dy REAL,
    dz REAL,
    ux REAL,
    uy REAL,
    uz REAL
);

CREATE INDEX IF NOT EXISTS idx_raw_artifacts_item ON raw_artifacts(item_id);
CREATE INDEX IF NOT EXISTS idx_raw_artifacts_last_check ON raw_artifacts(last_check);

CREATE TABLE IF NOT EXISTS osg_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_artifact_id INTEGER NOT NULL,
    abs_path TEXT NOT NULL UNIQUE,
    last_mod INTEGER NOT NULL,
    last_check INTEGER NOT NULL,
    xml_path TEXT,
    offset_x REAL,
    offset_y REAL,
    offset_z REAL,
    srid INTEGER,
    x REAL,
    y REAL,
    z REAL
);

CREATE INDEX IF NOT EXISTS idx_osg_artifacts_raw ON osg_artifacts(raw_artifact_id);

CREATE TABLE IF NOT EXISTS potree_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_artifact_id INTEGER NOT NULL,
    abs_path TEXT NOT NULL UNIQUE,
    last_mod INTEGER NOT NULL,
    last_check INTEGER NOT NULL,
    number_levels INTEGER
);

CREATE INDEX IF NOT EXISTS idx_potree_artifacts_raw ON potree_artifacts(raw_artifact_id);

CREATE TABLE IF NOT EXISTS nexus_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_artifact_id INTEGER NOT NULL,
    abs_path TEXT NOT NULL UNIQUE,
    last_mod INTEGER NOT NULL,
    last_check INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nexus_artifacts_raw ON nexus_artifacts(raw_artifact_id);
"#;
