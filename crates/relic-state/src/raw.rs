use relic_core::error::StateError;
use relic_core::types::ArtifactType;
use rusqlite::{Connection, params};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            min_z: self.min_z.min(other.min_z),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            max_z: self.max_z.max(other.max_z),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointCloudMeta {
    pub srid: Option<i32>,
    pub num_points: u64,
    /// Dominant file extension (`las` or `laz`).
    pub extension: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub color_8bit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeshMeta {
    pub srid: Option<i32>,
    pub obj_file: Option<String>,
    pub mtl_file: Option<String>,
    pub ply_file: Option<String>,
    pub color_8bit: bool,
    pub current: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PictureMeta {
    pub srid: Option<i32>,
    pub position: Option<Vector3>,
    pub direction: Option<Vector3>,
    pub up: Option<Vector3>,
    pub thumbnail: bool,
    pub current: bool,
}

/// Type-specific metadata captured when a raw artifact is first catalogued.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawMetadata {
    PointCloud(PointCloudMeta),
    Mesh(MeshMeta),
    Picture(PictureMeta),
}

impl RawMetadata {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Self::PointCloud(_) => ArtifactType::PointCloud,
            Self::Mesh(_) => ArtifactType::Mesh,
            Self::Picture(_) => ArtifactType::Picture,
        }
    }

    pub fn srid(&self) -> Option<i32> {
        match self {
            Self::PointCloud(m) => m.srid,
            Self::Mesh(m) => m.srid,
            Self::Picture(m) => m.srid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRawArtifact {
    pub item_id: i64,
    pub abs_path: String,
    pub last_mod: i64,
    pub last_check: i64,
    pub metadata: RawMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawArtifact {
    pub id: i64,
    pub item_id: i64,
    pub abs_path: String,
    pub last_mod: i64,
    pub last_check: i64,
    pub metadata: RawMetadata,
}

impl RawArtifact {
    pub fn artifact_type(&self) -> ArtifactType {
        self.metadata.artifact_type()
    }
}

/// Insert a raw artifact and return its id.
pub fn insert(conn: &Connection, new: &NewRawArtifact) -> Result<i64, StateError> {
    let mut c = Columns::default();
    match &new.metadata {
        RawMetadata::PointCloud(m) => {
            c.srid = m.srid;
            c.color_8bit = m.color_8bit;
            c.num_points = Some(m.num_points as i64);
            c.extension = m.extension.clone();
            c.bbox = m.bbox;
        }
        RawMetadata::Mesh(m) => {
            c.srid = m.srid;
            c.color_8bit = m.color_8bit;
            c.current = m.current;
            c.obj_file = m.obj_file.clone();
            c.mtl_file = m.mtl_file.clone();
            c.ply_file = m.ply_file.clone();
        }
        RawMetadata::Picture(m) => {
            c.srid = m.srid;
            c.current = m.current;
            c.thumbnail = m.thumbnail;
            c.position = m.position;
            c.direction = m.direction;
            c.up = m.up;
        }
    }

    conn.execute(
        "INSERT INTO raw_artifacts (
            item_id, artifact_type, abs_path, last_mod, last_check,
            srid, color_8bit, current, thumbnail, num_points, extension,
            min_x, min_y, min_z, max_x, max_y, max_z,
            obj_file, mtl_file, ply_file,
            x, y, z, dx, dy, dz, ux, uy, uz
         ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20,
            ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29
         )",
        params![
            new.item_id,
            new.metadata.artifact_type().as_str(),
            new.abs_path,
            new.last_mod,
            new.last_check,
            c.srid,
            c.color_8bit,
            c.current,
            c.thumbnail,
            c.num_points,
            c.extension,
            c.bbox.map(|b| b.min_x),
            c.bbox.map(|b| b.min_y),
            c.bbox.map(|b| b.min_z),
            c.bbox.map(|b| b.max_x),
            c.bbox.map(|b| b.max_y),
            c.bbox.map(|b| b.max_z),
            c.obj_file,
            c.mtl_file,
            c.ply_file,
            c.position.map(|v| v.x),
            c.position.map(|v| v.y),
            c.position.map(|v| v.z),
            c.direction.map(|v| v.x),
            c.direction.map(|v| v.y),
            c.direction.map(|v| v.z),
            c.up.map(|v| v.x),
            c.up.map(|v| v.y),
            c.up.map(|v| v.z),
        ],
    )
    .map_err(StateError::sqlite)?;
    Ok(conn.last_insert_rowid())
}

/// Flattened column values for one row.
#[derive(Default)]
struct Columns {
    srid: Option<i32>,
    color_8bit: bool,
    current: bool,
    thumbnail: bool,
    num_points: Option<i64>,
    extension: Option<String>,
    bbox: Option<BoundingBox>,
    obj_file: Option<String>,
    mtl_file: Option<String>,
    ply_file: Option<String>,
    position: Option<Vector3>,
    direction: Option<Vector3>,
    up: Option<Vector3>,
}

const SELECT_COLUMNS: &str = "id, item_id, artifact_type, abs_path, last_mod, last_check,
    srid, color_8bit, current, thumbnail, num_points, extension,
    min_x, min_y, min_z, max_x, max_y, max_z,
    obj_file, mtl_file, ply_file,
    x, y, z, dx, dy, dz, ux, uy, uz";

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<RawArtifact>, StateError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM raw_artifacts WHERE id = ?1");
    let result = conn.query_row(&sql, params![id], map_raw);
    match result {
        Ok(raw) => Ok(Some(raw)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

pub fn get_by_path(conn: &Connection, abs_path: &str) -> Result<Option<RawArtifact>, StateError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM raw_artifacts WHERE abs_path = ?1");
    let result = conn.query_row(&sql, params![abs_path], map_raw);
    match result {
        Ok(raw) => Ok(Some(raw)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

/// All raw artifacts, optionally restricted to one type, ordered by item then path.
pub fn list(
    conn: &Connection,
    artifact_type: Option<ArtifactType>,
) -> Result<Vec<RawArtifact>, StateError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM raw_artifacts
         WHERE (?1 IS NULL OR artifact_type = ?1)
         ORDER BY item_id, abs_path"
    );
    let mut stmt = conn.prepare(&sql).map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![artifact_type.map(|t| t.as_str())], map_raw)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| StateError::Sqlite(e.to_string()))
}

/// Background point clouds, the source tiles for elevation cutouts.
pub fn background_point_clouds(conn: &Connection) -> Result<Vec<RawArtifact>, StateError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM raw_artifacts
         WHERE item_id < 0 AND artifact_type = ?1
         ORDER BY abs_path"
    );
    let mut stmt = conn.prepare(&sql).map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![ArtifactType::PointCloud.as_str()], map_raw)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| StateError::Sqlite(e.to_string()))
}

fn vector(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Option<Vector3> {
    match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Some(Vector3 { x, y, z }),
        _ => None,
    }
}

fn map_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawArtifact> {
    let type_name: String = row.get("artifact_type")?;
    let artifact_type = ArtifactType::parse_type(&type_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown artifact type '{type_name}'").into(),
        )
    })?;

    let srid: Option<i32> = row.get("srid")?;
    let color_8bit: bool = row.get("color_8bit")?;
    let current: bool = row.get("current")?;

    let metadata = match artifact_type {
        ArtifactType::PointCloud => {
            let bbox = match (
                row.get::<_, Option<f64>>("min_x")?,
                row.get::<_, Option<f64>>("min_y")?,
                row.get::<_, Option<f64>>("min_z")?,
                row.get::<_, Option<f64>>("max_x")?,
                row.get::<_, Option<f64>>("max_y")?,
                row.get::<_, Option<f64>>("max_z")?,
            ) {
                (Some(min_x), Some(min_y), Some(min_z), Some(max_x), Some(max_y), Some(max_z)) => {
                    Some(BoundingBox {
                        min_x,
                        min_y,
                        min_z,
                        max_x,
                        max_y,
                        max_z,
                    })
                }
                _ => None,
            };
            RawMetadata::PointCloud(PointCloudMeta {
                srid,
                num_points: row.get::<_, Option<i64>>("num_points")?.unwrap_or(0) as u64,
                extension: row.get("extension")?,
                bbox,
                color_8bit,
            })
        }
        ArtifactType::Mesh => RawMetadata::Mesh(MeshMeta {
            srid,
            obj_file: row.get("obj_file")?,
            mtl_file: row.get("mtl_file")?,
            ply_file: row.get("ply_file")?,
            color_8bit,
            current,
        }),
        ArtifactType::Picture => RawMetadata::Picture(PictureMeta {
            srid,
            position: vector(row.get("x")?, row.get("y")?, row.get("z")?),
            direction: vector(row.get("dx")?, row.get("dy")?, row.get("dz")?),
            up: vector(row.get("ux")?, row.get("uy")?, row.get("uz")?),
            thumbnail: row.get("thumbnail")?,
            current,
        }),
    };

    Ok(RawArtifact {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        abs_path: row.get("abs_path")?,
        last_mod: row.get("last_mod")?,
        last_check: row.get("last_check")?,
        metadata,
    })
}
