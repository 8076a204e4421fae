use super::open_catalog;
use anyhow::{Context, Result};
use relic_core::config::Config;
use relic_state::items;
use relic_sync::geometry::envelope_from_wkt;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct FootprintRecord {
    pub item_id: i64,
    pub wkt: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub fn run(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<FootprintRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let conn = open_catalog(config)?;
    let stats = import(&conn, &records)?;

    println!("Footprint import complete");
    println!("  File: {}", file.display());
    println!("  Created: {}", stats.created);
    println!("  Updated: {}", stats.updated);
    println!("  Skipped: {}", stats.skipped);
    Ok(())
}

/// Store every usable footprint. Background ids and unparseable polygons are skipped.
pub fn import(conn: &Connection, records: &[FootprintRecord]) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    for record in records {
        if record.item_id < 0 {
            warn!(item_id = record.item_id, "Skipping footprint for the background item");
            stats.skipped += 1;
            continue;
        }
        if envelope_from_wkt(&record.wkt).is_none() {
            warn!(item_id = record.item_id, "Skipping footprint without coordinates");
            stats.skipped += 1;
            continue;
        }
        if items::upsert_footprint(conn, record.item_id, &record.wkt)? {
            stats.created += 1;
        } else {
            stats.updated += 1;
        }
    }
    Ok(stats)
}
