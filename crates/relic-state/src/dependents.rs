use relic_core::error::StateError;
use rusqlite::{Connection, params};

/// Number of derived records, across every derived stage, that reference `raw_artifact_id`.
///
/// One statement, so the three tables are read from the same snapshot.
pub fn count_dependents(conn: &Connection, raw_artifact_id: i64) -> Result<u64, StateError> {
    let count: i64 = conn
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM osg_artifacts WHERE raw_artifact_id = ?1)
              + (SELECT COUNT(*) FROM potree_artifacts WHERE raw_artifact_id = ?1)
              + (SELECT COUNT(*) FROM nexus_artifacts WHERE raw_artifact_id = ?1)",
            params![raw_artifact_id],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;
    Ok(count as u64)
}
