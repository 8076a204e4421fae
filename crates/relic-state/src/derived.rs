use crate::raw::Vector3;
use relic_core::error::StateError;
use rusqlite::{Connection, params};
use serde::Serialize;

/// Where a render-ready artifact should be placed in the viewer's world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OsgLocation {
    pub srid: Option<i32>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOsgArtifact {
    pub raw_artifact_id: i64,
    pub abs_path: String,
    pub last_mod: i64,
    pub last_check: i64,
    pub xml_path: Option<String>,
    /// Converter offsets. Mandatory for point-cloud backgrounds.
    pub offsets: Option<Vector3>,
    /// Absent for point-cloud backgrounds, which are positioned by their offsets.
    pub location: Option<OsgLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsgArtifact {
    pub id: i64,
    pub raw_artifact_id: i64,
    pub abs_path: String,
    pub last_mod: i64,
    pub last_check: i64,
    pub xml_path: Option<String>,
    pub offsets: Option<Vector3>,
    pub location: Option<OsgLocation>,
}

pub fn insert_osg(conn: &Connection, new: &NewOsgArtifact) -> Result<i64, StateError> {
    conn.execute(
        "INSERT INTO osg_artifacts (
            raw_artifact_id, abs_path, last_mod, last_check, xml_path,
            offset_x, offset_y, offset_z, srid, x, y, z
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            new.raw_artifact_id,
            new.abs_path,
            new.last_mod,
            new.last_check,
            new.xml_path,
            new.offsets.map(|o| o.x),
            new.offsets.map(|o| o.y),
            new.offsets.map(|o| o.z),
            new.location.and_then(|l| l.srid),
            new.location.map(|l| l.x),
            new.location.map(|l| l.y),
            new.location.map(|l| l.z),
        ],
    )
    .map_err(StateError::sqlite)?;
    Ok(conn.last_insert_rowid())
}

pub fn get_osg(conn: &Connection, id: i64) -> Result<Option<OsgArtifact>, StateError> {
    let result = conn.query_row(
        "SELECT id, raw_artifact_id, abs_path, last_mod, last_check, xml_path,
                offset_x, offset_y, offset_z, srid, x, y, z
         FROM osg_artifacts WHERE id = ?1",
        params![id],
        |row| {
            let offsets = match (
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<f64>>(8)?,
            ) {
                (Some(x), Some(y), Some(z)) => Some(Vector3 { x, y, z }),
                _ => None,
            };
            let location = match (
                row.get::<_, Option<f64>>(10)?,
                row.get::<_, Option<f64>>(11)?,
                row.get::<_, Option<f64>>(12)?,
            ) {
                (Some(x), Some(y), Some(z)) => Some(OsgLocation {
                    srid: row.get(9)?,
                    x,
                    y,
                    z,
                }),
                _ => None,
            };
            Ok(OsgArtifact {
                id: row.get(0)?,
                raw_artifact_id: row.get(1)?,
                abs_path: row.get(2)?,
                last_mod: row.get(3)?,
                last_check: row.get(4)?,
                xml_path: row.get(5)?,
                offsets,
                location,
            })
        },
    );

    match result {
        Ok(osg) => Ok(Some(osg)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

/// Converter offsets of the OSG point-cloud background sharing `srid`.
/// Site conversions in that SRID are expressed relative to it.
pub fn background_offsets(conn: &Connection, srid: i32) -> Result<Option<Vector3>, StateError> {
    let result = conn.query_row(
        "SELECT o.offset_x, o.offset_y, o.offset_z
         FROM osg_artifacts o JOIN raw_artifacts r ON r.id = o.raw_artifact_id
         WHERE r.item_id < 0 AND r.artifact_type = 'point_cloud' AND r.srid = ?1
           AND o.offset_x IS NOT NULL AND o.offset_y IS NOT NULL AND o.offset_z IS NOT NULL
         ORDER BY o.id LIMIT 1",
        params![srid],
        |row| {
            Ok(Vector3 {
                x: row.get(0)?,
                y: row.get(1)?,
                z: row.get(2)?,
            })
        },
    );

    match result {
        Ok(offsets) => Ok(Some(offsets)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

pub fn insert_potree(
    conn: &Connection,
    raw_artifact_id: i64,
    abs_path: &str,
    last_mod: i64,
    last_check: i64,
    number_levels: Option<i32>,
) -> Result<i64, StateError> {
    conn.execute(
        "INSERT INTO potree_artifacts (raw_artifact_id, abs_path, last_mod, last_check, number_levels)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![raw_artifact_id, abs_path, last_mod, last_check, number_levels],
    )
    .map_err(StateError::sqlite)?;
    Ok(conn.last_insert_rowid())
}

pub fn potree_levels(conn: &Connection, id: i64) -> Result<Option<i32>, StateError> {
    let result = conn.query_row(
        "SELECT number_levels FROM potree_artifacts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    );
    match result {
        Ok(levels) => Ok(levels),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

pub fn insert_nexus(
    conn: &Connection,
    raw_artifact_id: i64,
    abs_path: &str,
    last_mod: i64,
    last_check: i64,
) -> Result<i64, StateError> {
    conn.execute(
        "INSERT INTO nexus_artifacts (raw_artifact_id, abs_path, last_mod, last_check)
         VALUES (?1, ?2, ?3, ?4)",
        params![raw_artifact_id, abs_path, last_mod, last_check],
    )
    .map_err(StateError::sqlite)?;
    Ok(conn.last_insert_rowid())
}
