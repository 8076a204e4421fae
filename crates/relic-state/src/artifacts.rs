//! Operations shared by every per-stage artifact table.

use relic_core::error::StateError;
use relic_core::types::{ArtifactType, Stage};
use rusqlite::{Connection, params};
use serde::Serialize;

/// Catalog table backing a stage.
pub fn table_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Raw => "raw_artifacts",
        Stage::Osg => "osg_artifacts",
        Stage::Potree => "potree_artifacts",
        Stage::Nexus => "nexus_artifacts",
    }
}

/// The bookkeeping columns of an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub id: i64,
    pub last_mod: i64,
    pub last_check: i64,
}

/// A record not revisited by the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleRecord {
    pub id: i64,
    pub abs_path: String,
    /// Type of the record itself (raw) or of its raw artifact (derived).
    /// `None` when a derived record points at a raw artifact that is gone.
    pub artifact_type: Option<ArtifactType>,
    pub raw_artifact_id: Option<i64>,
    pub last_check: i64,
}

pub fn find_by_path(
    conn: &Connection,
    stage: Stage,
    abs_path: &str,
) -> Result<Option<Stamp>, StateError> {
    let sql = format!(
        "SELECT id, last_mod, last_check FROM {} WHERE abs_path = ?1",
        table_name(stage)
    );
    let result = conn.query_row(&sql, params![abs_path], |row| {
        Ok(Stamp {
            id: row.get(0)?,
            last_mod: row.get(1)?,
            last_check: row.get(2)?,
        })
    });

    match result {
        Ok(stamp) => Ok(Some(stamp)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

/// Advance `last_check` to the run epoch. Never moves it backwards.
pub fn touch(conn: &Connection, stage: Stage, id: i64, epoch: i64) -> Result<(), StateError> {
    let sql = format!(
        "UPDATE {} SET last_check = MAX(last_check, ?2) WHERE id = ?1",
        table_name(stage)
    );
    conn.execute(&sql, params![id, epoch])
        .map_err(StateError::sqlite)?;
    Ok(())
}

/// Records of `stage` whose `last_check` is strictly older than `epoch`.
pub fn select_stale(
    conn: &Connection,
    stage: Stage,
    epoch: i64,
) -> Result<Vec<StaleRecord>, StateError> {
    let sql = match stage {
        Stage::Raw => "SELECT id, abs_path, artifact_type, NULL, last_check
                       FROM raw_artifacts WHERE last_check < ?1 ORDER BY id"
            .to_string(),
        derived => format!(
            "SELECT d.id, d.abs_path, r.artifact_type, d.raw_artifact_id, d.last_check
             FROM {} d LEFT JOIN raw_artifacts r ON r.id = d.raw_artifact_id
             WHERE d.last_check < ?1 ORDER BY d.id",
            table_name(derived)
        ),
    };

    let mut stmt = conn.prepare(&sql).map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![epoch], |row| {
            let artifact_type: Option<String> = row.get(2)?;
            Ok(StaleRecord {
                id: row.get(0)?,
                abs_path: row.get(1)?,
                artifact_type: artifact_type.as_deref().and_then(ArtifactType::parse_type),
                raw_artifact_id: row.get(3)?,
                last_check: row.get(4)?,
            })
        })
        .map_err(StateError::sqlite)?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| StateError::Sqlite(e.to_string()))
}

/// Delete one record. Returns false when it was already gone.
pub fn delete(conn: &Connection, stage: Stage, id: i64) -> Result<bool, StateError> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table_name(stage));
    let changed = conn
        .execute(&sql, params![id])
        .map_err(StateError::sqlite)?;
    Ok(changed > 0)
}

/// Largest `last_check` stored in any artifact table.
pub fn max_last_check(conn: &Connection) -> Result<Option<i64>, StateError> {
    conn.query_row(
        "SELECT MAX(v) FROM (
            SELECT MAX(last_check) AS v FROM raw_artifacts
            UNION ALL SELECT MAX(last_check) FROM osg_artifacts
            UNION ALL SELECT MAX(last_check) FROM potree_artifacts
            UNION ALL SELECT MAX(last_check) FROM nexus_artifacts
        )",
        [],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

pub fn count(conn: &Connection, stage: Stage) -> Result<u64, StateError> {
    let sql = format!("SELECT COUNT(*) FROM {}", table_name(stage));
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .map_err(StateError::sqlite)?;
    Ok(count as u64)
}

/// Record counts for every stage, least-derived first.
pub fn stage_counts(conn: &Connection) -> Result<Vec<(Stage, u64)>, StateError> {
    Stage::ALL
        .into_iter()
        .map(|stage| count(conn, stage).map(|n| (stage, n)))
        .collect()
}
