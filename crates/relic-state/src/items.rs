use relic_core::error::StateError;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// A site or the shared background, owner of raw artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: i64,
    pub background: bool,
    /// Footprint polygon as WKT.
    pub footprint: Option<String>,
    pub min_z: Option<f64>,
    pub max_z: Option<f64>,
    pub z_points: Option<i64>,
}

impl Item {
    /// Midpoint of the vertical extent, when both bounds are known.
    pub fn mid_z(&self) -> Option<f64> {
        match (self.min_z, self.max_z) {
            (Some(lo), Some(hi)) => Some(lo + (hi - lo) / 2.0),
            _ => None,
        }
    }
}

/// Insert the item row if it does not exist yet. Returns true when created.
pub fn ensure_item(conn: &Connection, item_id: i64) -> Result<bool, StateError> {
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO items (id, background) VALUES (?1, ?2)",
            params![item_id, item_id < 0],
        )
        .map_err(StateError::sqlite)?;
    Ok(changed > 0)
}

pub fn get_item(conn: &Connection, item_id: i64) -> Result<Option<Item>, StateError> {
    conn.query_row(
        "SELECT id, background, footprint, min_z, max_z, z_points FROM items WHERE id = ?1",
        params![item_id],
        map_item,
    )
    .optional()
    .map_err(StateError::sqlite)
}

pub fn list_items(conn: &Connection) -> Result<Vec<Item>, StateError> {
    let mut stmt = conn
        .prepare("SELECT id, background, footprint, min_z, max_z, z_points FROM items ORDER BY id")
        .map_err(StateError::sqlite)?;
    let rows = stmt.query_map([], map_item).map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

/// Set the footprint of an item, creating the item when missing.
/// Returns true when the item was created.
pub fn upsert_footprint(conn: &Connection, item_id: i64, wkt: &str) -> Result<bool, StateError> {
    let created = ensure_item(conn, item_id)?;
    conn.execute(
        "UPDATE items SET footprint = ?2 WHERE id = ?1",
        params![item_id, wkt],
    )
    .map_err(StateError::sqlite)?;
    Ok(created)
}

/// Overwrite the vertical extent of an item.
pub fn update_extent(
    conn: &Connection,
    item_id: i64,
    min_z: f64,
    max_z: f64,
    points: u64,
) -> Result<(), StateError> {
    let changed = conn
        .execute(
            "UPDATE items SET min_z = ?2, max_z = ?3, z_points = ?4 WHERE id = ?1",
            params![item_id, min_z, max_z, points as i64],
        )
        .map_err(StateError::sqlite)?;
    if changed == 0 {
        return Err(StateError::ItemNotFound { item_id });
    }
    Ok(())
}

/// Site items that have a footprint, i.e. everything bulk recompute can work on.
pub fn recompute_candidates(conn: &Connection) -> Result<Vec<i64>, StateError> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM items WHERE background = 0 AND footprint IS NOT NULL ORDER BY id",
        )
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        background: row.get(1)?,
        footprint: row.get(2)?,
        min_z: row.get(3)?,
        max_z: row.get(4)?,
        z_points: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, schema};
    use tempfile::{TempDir, tempdir};

    fn setup_test_db() -> (TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("catalog.db")).unwrap();
        schema::create_tables(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn ensure_item_creates_once() {
        let (_dir, conn) = setup_test_db();
        assert!(ensure_item(&conn, 7).unwrap());
        assert!(!ensure_item(&conn, 7).unwrap());
        assert!(ensure_item(&conn, -1).unwrap());

        let site = get_item(&conn, 7).unwrap().unwrap();
        assert!(!site.background);
        let back = get_item(&conn, -1).unwrap().unwrap();
        assert!(back.background);
        assert!(get_item(&conn, 99).unwrap().is_none());
    }

    #[test]
    fn update_extent_requires_existing_item() {
        let (_dir, conn) = setup_test_db();
        let err = update_extent(&conn, 3, 1.0, 2.0, 10).unwrap_err();
        assert!(matches!(err, StateError::ItemNotFound { item_id: 3 }));

        ensure_item(&conn, 3).unwrap();
        update_extent(&conn, 3, 10.0, 14.0, 1234).unwrap();
        let item = get_item(&conn, 3).unwrap().unwrap();
        assert_eq!(item.min_z, Some(10.0));
        assert_eq!(item.max_z, Some(14.0));
        assert_eq!(item.z_points, Some(1234));
        assert_eq!(item.mid_z(), Some(12.0));
    }

    #[test]
    fn recompute_candidates_skip_background_and_missing_footprints() {
        let (_dir, conn) = setup_test_db();
        upsert_footprint(&conn, -1, "POLYGON((0 0,1 0,1 1,0 0))").unwrap();
        upsert_footprint(&conn, 5, "POLYGON((0 0,1 0,1 1,0 0))").unwrap();
        ensure_item(&conn, 6).unwrap();
        assert!(upsert_footprint(&conn, 2, "POLYGON((0 0,2 0,2 2,0 0))").unwrap());
        assert!(!upsert_footprint(&conn, 2, "POLYGON((0 0,3 0,3 3,0 0))").unwrap());

        assert_eq!(recompute_candidates(&conn).unwrap(), vec![2, 5]);
        let item = get_item(&conn, 2).unwrap().unwrap();
        assert_eq!(item.footprint.as_deref(), Some("POLYGON((0 0,3 0,3 3,0 0))"));
        assert_eq!(list_items(&conn).unwrap().len(), 4);
    }
}
