pub mod doctor;
pub mod import_footprints;
pub mod list;
pub mod recompute;
pub mod sync;

use anyhow::{Context, Result};
use relic_core::config::Config;
use relic_state::{db, schema};
use rusqlite::Connection;

/// Open the configured catalog, creating or migrating its schema.
pub fn open_catalog(config: &Config) -> Result<Connection> {
    let db_path = config.catalog_path();
    let conn = db::open_from_config(&db_path, &config.catalog)
        .with_context(|| format!("Failed to open catalog at {}", db_path.display()))?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

/// Split a comma-separated CLI list, dropping empty entries.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_lists_ignore_blanks() {
        assert_eq!(split_csv("raw, osg,,nexus "), vec!["raw", "osg", "nexus"]);
        assert!(split_csv(" , ").is_empty());
    }
}
