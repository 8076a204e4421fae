//! Type-specific metadata read from a newly discovered leaf.
//!
//! Nothing here touches the catalog: extraction either returns a complete
//! value or an `ExtractError`, so a failing leaf never leaves a partial row.

use crate::geometry;
use crate::las;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use relic_core::error::ExtractError;
use relic_core::types::{ArtifactLocation, ArtifactType};
use relic_state::derived::OsgLocation;
use relic_state::items::Item;
use relic_state::raw::{
    BoundingBox, MeshMeta, PictureMeta, PointCloudMeta, RawMetadata, Vector3,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, warn};

struct Patterns {
    las: GlobMatcher,
    laz: GlobMatcher,
    obj: GlobMatcher,
    mtl: GlobMatcher,
    ply: GlobMatcher,
    osgb: GlobMatcher,
    xml: GlobMatcher,
    offset: GlobMatcher,
}

fn matcher(pattern: &str) -> GlobMatcher {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .expect("builtin leaf glob pattern must be valid")
        .compile_matcher()
}

fn patterns() -> &'static Patterns {
    static SET: OnceLock<Patterns> = OnceLock::new();
    SET.get_or_init(|| Patterns {
        las: matcher("*.las"),
        laz: matcher("*.laz"),
        obj: matcher("*.obj"),
        mtl: matcher("*.mtl"),
        ply: matcher("*.ply"),
        osgb: matcher("*.osgb"),
        xml: matcher("*.xml"),
        offset: matcher("*offset.txt"),
    })
}

fn mesh_srid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_SRID_([^_]*)").expect("mesh SRID regex must be valid"))
}

fn potree_levels_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_levels_(\d+)").expect("potree levels regex must be valid"))
}

/// Direct children of `dir` whose file name matches, sorted by path.
fn children_matching(dir: &Path, glob: &GlobMatcher) -> Result<Vec<PathBuf>, ExtractError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ExtractError::io(dir, e))?;
    let mut matched = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ExtractError::io(dir, e))?;
        if glob.is_match(entry.file_name()) {
            matched.push(entry.path());
        }
    }
    matched.sort();
    Ok(matched)
}

/// First match, warning when there are several.
fn first_matching(dir: &Path, glob: &GlobMatcher) -> Result<Option<PathBuf>, ExtractError> {
    let matched = children_matching(dir, glob)?;
    if matched.len() > 1 {
        warn!(
            path = %dir.display(),
            pattern = glob.glob().glob(),
            using = %matched[0].display(),
            "Multiple candidate files found"
        );
    }
    Ok(matched.into_iter().next())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn is_8bit_color(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("8bc") || lower.contains("8bit")
}

pub fn is_thumbnail(name: &str) -> bool {
    name.to_ascii_lowercase().contains("_thumb")
}

/// SRID from a `_SRID_<n>` token in a mesh leaf name.
pub fn mesh_srid(name: &str) -> Option<i32> {
    let caps = mesh_srid_regex().captures(name)?;
    match caps[1].parse() {
        Ok(srid) => Some(srid),
        Err(_) => {
            error!(leaf = name, token = &caps[1], "SRID not recognized in mesh name");
            None
        }
    }
}

/// Level-of-detail count from a `_levels_<n>` token in a POTREE conversion name.
pub fn potree_levels(name: &str) -> Option<i32> {
    potree_levels_regex().captures(name)?[1].parse().ok()
}

/// Side-car file holding picture metadata for `picture`.
pub fn sidecar_path(picture: &Path) -> PathBuf {
    let mut name = picture.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Whether `path` is a picture side-car rather than a leaf. Side-cars are
/// never leaves, including those whose picture has been removed.
pub fn is_sidecar(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// LAS and LAZ files directly inside `dir`, sorted by path.
pub fn point_cloud_files(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let p = patterns();
    let mut files = children_matching(dir, &p.las)?;
    files.extend(children_matching(dir, &p.laz)?);
    files.sort();
    Ok(files)
}

/// Metadata for a raw leaf, dispatched on its artifact type.
pub fn extract_raw(path: &Path, loc: &ArtifactLocation) -> Result<RawMetadata, ExtractError> {
    match loc.artifact_type {
        ArtifactType::PointCloud => extract_point_cloud(path, &loc.leaf).map(RawMetadata::PointCloud),
        ArtifactType::Mesh => extract_mesh(path, loc).map(RawMetadata::Mesh),
        ArtifactType::Picture => extract_picture(path, loc).map(RawMetadata::Picture),
    }
}

fn extract_point_cloud(path: &Path, leaf: &str) -> Result<PointCloudMeta, ExtractError> {
    let p = patterns();
    let (las_files, laz_files) = if path.is_dir() {
        (
            children_matching(path, &p.las)?,
            children_matching(path, &p.laz)?,
        )
    } else if p.las.is_match(path.file_name().unwrap_or_default()) {
        (vec![path.to_path_buf()], Vec::new())
    } else if p.laz.is_match(path.file_name().unwrap_or_default()) {
        (Vec::new(), vec![path.to_path_buf()])
    } else {
        (Vec::new(), Vec::new())
    };

    if las_files.is_empty() && laz_files.is_empty() {
        return Err(ExtractError::MissingFile {
            path: path.to_path_buf(),
            expected: "las/laz",
        });
    }
    let extension = if las_files.len() >= laz_files.len() {
        "las"
    } else {
        "laz"
    };

    let mut num_points = 0u64;
    let mut bbox: Option<BoundingBox> = None;
    let mut srids = BTreeSet::new();
    for file in las_files.iter().chain(laz_files.iter()) {
        let header = las::read_header(file)?;
        num_points += header.point_count;
        if header.point_count > 0 {
            bbox = Some(match bbox {
                Some(b) => b.union(&header.bbox),
                None => header.bbox,
            });
        }
        if let Some(srid) = header.srid {
            srids.insert(srid);
        }
    }

    let srid = match srids.len() {
        0 => {
            info!(path = %path.display(), "SRID is not set");
            None
        }
        1 => srids.into_iter().next(),
        _ => {
            error!(path = %path.display(), ?srids, "SRID is not the same in all files");
            None
        }
    };

    Ok(PointCloudMeta {
        srid,
        num_points,
        extension: Some(extension.to_string()),
        bbox,
        color_8bit: is_8bit_color(leaf),
    })
}

fn extract_mesh(path: &Path, loc: &ArtifactLocation) -> Result<MeshMeta, ExtractError> {
    let p = patterns();
    let (obj, mtl, ply) = if path.is_dir() {
        (
            first_matching(path, &p.obj)?,
            first_matching(path, &p.mtl)?,
            first_matching(path, &p.ply)?,
        )
    } else {
        let name = path.file_name().unwrap_or_default();
        let this = || Some(path.to_path_buf());
        (
            if p.obj.is_match(name) { this() } else { None },
            None,
            if p.ply.is_match(name) { this() } else { None },
        )
    };

    if obj.is_none() && ply.is_none() {
        return Err(ExtractError::MissingFile {
            path: path.to_path_buf(),
            expected: "obj/ply",
        });
    }

    Ok(MeshMeta {
        srid: mesh_srid(&loc.leaf),
        obj_file: obj.as_deref().map(path_string),
        mtl_file: mtl.as_deref().map(path_string),
        ply_file: ply.as_deref().map(path_string),
        color_8bit: is_8bit_color(&loc.leaf),
        current: loc.is_current(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PictureSidecar {
    srid: Option<i32>,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    dx: Option<f64>,
    dy: Option<f64>,
    dz: Option<f64>,
    ux: Option<f64>,
    uy: Option<f64>,
    uz: Option<f64>,
}

fn vector(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Option<Vector3> {
    Some(Vector3 {
        x: x?,
        y: y?,
        z: z?,
    })
}

fn extract_picture(path: &Path, loc: &ArtifactLocation) -> Result<PictureMeta, ExtractError> {
    let sidecar = sidecar_path(path);
    let meta = if sidecar.is_file() {
        let content = std::fs::read_to_string(&sidecar).map_err(|e| ExtractError::io(&sidecar, e))?;
        serde_json::from_str::<PictureSidecar>(&content).map_err(|e| {
            ExtractError::InvalidSidecar {
                path: sidecar.clone(),
                reason: e.to_string(),
            }
        })?
    } else {
        PictureSidecar::default()
    };

    Ok(PictureMeta {
        srid: meta.srid,
        position: vector(meta.x, meta.y, meta.z),
        direction: vector(meta.dx, meta.dy, meta.dz),
        up: vector(meta.ux, meta.uy, meta.uz),
        thumbnail: is_thumbnail(&loc.leaf),
        current: loc.is_current(),
    })
}

/// Files found in an OSG leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct OsgLeaf {
    pub xml_path: Option<String>,
    pub offsets: Option<Vector3>,
}

/// Validate an OSG leaf. Point-cloud backgrounds must carry an offset file,
/// everything else an XML description.
pub fn read_osg_leaf(path: &Path, pc_background: bool) -> Result<OsgLeaf, ExtractError> {
    let p = patterns();
    if !path.is_dir() || children_matching(path, &p.osgb)?.is_empty() {
        return Err(ExtractError::MissingFile {
            path: path.to_path_buf(),
            expected: "osgb",
        });
    }

    let offsets = read_offsets(path)?;
    if pc_background {
        if offsets.is_none() {
            return Err(ExtractError::MissingFile {
                path: path.to_path_buf(),
                expected: "offset.txt",
            });
        }
        return Ok(OsgLeaf {
            xml_path: None,
            offsets,
        });
    }

    let xml = first_matching(path, &p.xml)?.ok_or_else(|| ExtractError::MissingFile {
        path: path.to_path_buf(),
        expected: "xml",
    })?;
    Ok(OsgLeaf {
        xml_path: Some(path_string(&xml)),
        offsets,
    })
}

/// Converter offsets from the first `*offset.txt` (`<label>: x y z` on line one).
pub fn read_offsets(dir: &Path) -> Result<Option<Vector3>, ExtractError> {
    let Some(file) = first_matching(dir, &patterns().offset)? else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(&file).map_err(|e| ExtractError::io(&file, e))?;
    let invalid = |reason: &str| ExtractError::InvalidSidecar {
        path: file.clone(),
        reason: reason.to_string(),
    };

    let first_line = content.lines().next().unwrap_or_default();
    let (_, values) = first_line
        .split_once(':')
        .ok_or_else(|| invalid("expected '<label>: x y z'"))?;
    let parsed: Vec<f64> = values
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|_| invalid("offsets are not numbers"))?;
    match parsed.as_slice() {
        [x, y, z] => Ok(Some(Vector3 {
            x: *x,
            y: *y,
            z: *z,
        })),
        _ => Err(invalid("expected exactly three offsets")),
    }
}

/// Where a non-background OSG conversion sits in the viewer's world.
///
/// Point clouds and meshes with a known SRID add their converter offsets to
/// those of the OSG background in the same SRID. Pictures reuse the raw
/// position from their side-car. Otherwise the item footprint's envelope
/// centre at the middle of its vertical extent is used. Returns `None` when
/// no method applies.
pub fn osg_location(
    raw: &RawMetadata,
    leaf_offsets: Option<Vector3>,
    background_offsets: Option<Vector3>,
    item: Option<&Item>,
) -> Option<OsgLocation> {
    let from_raw = match raw {
        RawMetadata::PointCloud(_) | RawMetadata::Mesh(_) => match (
            raw.srid(),
            leaf_offsets,
            background_offsets,
        ) {
            (Some(srid), Some(own), Some(base)) => Some(OsgLocation {
                srid: Some(srid),
                x: own.x + base.x,
                y: own.y + base.y,
                z: own.z + base.z,
            }),
            _ => None,
        },
        RawMetadata::Picture(meta) => match (meta.srid, meta.position) {
            (Some(srid), Some(pos)) => Some(OsgLocation {
                srid: Some(srid),
                x: pos.x,
                y: pos.y,
                z: pos.z,
            }),
            _ => None,
        },
    };
    if from_raw.is_some() {
        return from_raw;
    }

    let item = item?;
    let footprint = item.footprint.as_deref()?;
    let (x, y) = geometry::envelope_from_wkt(footprint)?.centre();
    Some(OsgLocation {
        srid: geometry::footprint_srid(footprint),
        x,
        y,
        z: item.mid_z().unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::las::tests::{bbox, las_bytes};
    use relic_core::types::{ItemKind, Period, Stage};
    use std::fs;
    use tempfile::tempdir;

    fn location(artifact_type: ArtifactType, period: Option<Period>, leaf: &str) -> ArtifactLocation {
        ArtifactLocation {
            stage: Stage::Raw,
            artifact_type,
            kind: ItemKind::Site,
            period,
            site_id: Some(7),
            leaf: leaf.to_string(),
        }
    }

    #[test]
    fn point_cloud_folder_is_aggregated() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("scan_8BIT");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("a.las"), las_bytes(10, bbox(0.0, 5.0), Some(32633))).unwrap();
        fs::write(leaf.join("b.LAS"), las_bytes(20, bbox(-2.0, 3.0), Some(32633))).unwrap();
        fs::write(leaf.join("c.laz"), las_bytes(0, bbox(-100.0, 100.0), None)).unwrap();
        fs::write(leaf.join("notes.txt"), b"ignored").unwrap();

        let meta = extract_raw(&leaf, &location(ArtifactType::PointCloud, None, "scan_8BIT")).unwrap();
        let RawMetadata::PointCloud(pc) = meta else {
            panic!("expected point cloud metadata");
        };
        assert_eq!(pc.num_points, 30);
        assert_eq!(pc.srid, Some(32633));
        assert_eq!(pc.extension.as_deref(), Some("las"));
        // empty files do not widen the bounds
        assert_eq!(pc.bbox, Some(bbox(-2.0, 5.0)));
        assert!(pc.color_8bit);
    }

    #[test]
    fn conflicting_srids_leave_srid_unset() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("scan");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("a.laz"), las_bytes(1, bbox(0.0, 1.0), Some(32633))).unwrap();
        fs::write(leaf.join("b.laz"), las_bytes(1, bbox(0.0, 1.0), Some(4326))).unwrap();
        let RawMetadata::PointCloud(pc) =
            extract_raw(&leaf, &location(ArtifactType::PointCloud, None, "scan")).unwrap()
        else {
            panic!("expected point cloud metadata");
        };
        assert_eq!(pc.srid, None);
        assert_eq!(pc.extension.as_deref(), Some("laz"));
    }

    #[test]
    fn point_cloud_without_las_files_fails() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("scan");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("readme.txt"), b"x").unwrap();
        assert!(matches!(
            extract_raw(&leaf, &location(ArtifactType::PointCloud, None, "scan")).unwrap_err(),
            ExtractError::MissingFile { .. }
        ));
    }

    #[test]
    fn single_file_point_cloud() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("tile.laz");
        fs::write(&file, las_bytes(3, bbox(1.0, 2.0), None)).unwrap();
        let RawMetadata::PointCloud(pc) =
            extract_raw(&file, &location(ArtifactType::PointCloud, None, "tile.laz")).unwrap()
        else {
            panic!("expected point cloud metadata");
        };
        assert_eq!(pc.num_points, 3);
        assert_eq!(pc.extension.as_deref(), Some("laz"));
    }

    #[test]
    fn mesh_files_and_name_tokens() {
        let dir = tempdir().unwrap();
        let name = "temple_SRID_32633_8bc";
        let leaf = dir.path().join(name);
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("temple.obj"), b"").unwrap();
        fs::write(leaf.join("temple.mtl"), b"").unwrap();

        let RawMetadata::Mesh(mesh) =
            extract_raw(&leaf, &location(ArtifactType::Mesh, Some(Period::Current), name)).unwrap()
        else {
            panic!("expected mesh metadata");
        };
        assert_eq!(mesh.srid, Some(32633));
        assert!(mesh.color_8bit);
        assert!(mesh.current);
        assert!(mesh.obj_file.unwrap().ends_with("temple.obj"));
        assert!(mesh.mtl_file.unwrap().ends_with("temple.mtl"));
        assert_eq!(mesh.ply_file, None);
    }

    #[test]
    fn mesh_without_geometry_fails() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("m");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("m.mtl"), b"").unwrap();
        assert!(matches!(
            extract_raw(&leaf, &location(ArtifactType::Mesh, Some(Period::ArchaeologicalReconstruction), "m"))
                .unwrap_err(),
            ExtractError::MissingFile { .. }
        ));
    }

    #[test]
    fn mesh_srid_token_parsing() {
        assert_eq!(mesh_srid("a_SRID_4326"), Some(4326));
        assert_eq!(mesh_srid("a_SRID_4326_b"), Some(4326));
        assert_eq!(mesh_srid("a_SRID_abc_b"), None);
        assert_eq!(mesh_srid("plain"), None);
    }

    #[test]
    fn picture_sidecar_is_optional_but_must_parse() {
        let dir = tempdir().unwrap();
        let pic = dir.path().join("view_thumb.jpg");
        fs::write(&pic, b"jpeg").unwrap();
        let loc = location(ArtifactType::Picture, Some(Period::Historical), "view_thumb.jpg");

        let RawMetadata::Picture(meta) = extract_raw(&pic, &loc).unwrap() else {
            panic!("expected picture metadata");
        };
        assert_eq!(meta.srid, None);
        assert!(meta.thumbnail);
        assert!(!meta.current);

        fs::write(
            sidecar_path(&pic),
            r#"{"srid": 32633, "x": 1.0, "y": 2.0, "z": 3.0, "dx": 0.0, "dy": 1.0}"#,
        )
        .unwrap();
        assert!(is_sidecar(&sidecar_path(&pic)));
        assert!(!is_sidecar(&pic));
        let RawMetadata::Picture(meta) = extract_raw(&pic, &loc).unwrap() else {
            panic!("expected picture metadata");
        };
        assert_eq!(meta.srid, Some(32633));
        assert_eq!(meta.position, Some(Vector3 { x: 1.0, y: 2.0, z: 3.0 }));
        // incomplete vectors stay unset
        assert_eq!(meta.direction, None);

        fs::write(sidecar_path(&pic), "{not json").unwrap();
        assert!(matches!(
            extract_raw(&pic, &loc).unwrap_err(),
            ExtractError::InvalidSidecar { .. }
        ));
    }

    #[test]
    fn side_car_stays_a_side_car_without_its_picture() {
        let dir = tempdir().unwrap();
        let orphan = dir.path().join("gone.jpg.json");
        fs::write(&orphan, "{}").unwrap();
        assert!(is_sidecar(&orphan));
        assert!(is_sidecar(Path::new("/x/upper.JPG.JSON")));
        assert!(!is_sidecar(Path::new("/x/view.jpg")));
    }

    #[test]
    fn osg_background_requires_offsets() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("drive");
        fs::create_dir(&leaf).unwrap();
        assert!(matches!(
            read_osg_leaf(&leaf, true).unwrap_err(),
            ExtractError::MissingFile { expected: "osgb", .. }
        ));

        fs::write(leaf.join("drive.osgb"), b"").unwrap();
        assert!(matches!(
            read_osg_leaf(&leaf, true).unwrap_err(),
            ExtractError::MissingFile { expected: "offset.txt", .. }
        ));

        fs::write(leaf.join("drive_offset.txt"), "offset: 10.5 -20 3\nrest").unwrap();
        let osg = read_osg_leaf(&leaf, true).unwrap();
        assert_eq!(osg.offsets, Some(Vector3 { x: 10.5, y: -20.0, z: 3.0 }));
        assert_eq!(osg.xml_path, None);
    }

    #[test]
    fn osg_site_requires_xml() {
        let dir = tempdir().unwrap();
        let leaf = dir.path().join("s");
        fs::create_dir(&leaf).unwrap();
        fs::write(leaf.join("s.osgb"), b"").unwrap();
        assert!(matches!(
            read_osg_leaf(&leaf, false).unwrap_err(),
            ExtractError::MissingFile { expected: "xml", .. }
        ));
        fs::write(leaf.join("s.xml"), b"<x/>").unwrap();
        let osg = read_osg_leaf(&leaf, false).unwrap();
        assert!(osg.xml_path.unwrap().ends_with("s.xml"));
        assert_eq!(osg.offsets, None);
    }

    #[test]
    fn malformed_offsets_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("offset.txt"), "offset: 1 2").unwrap();
        assert!(matches!(
            read_offsets(dir.path()).unwrap_err(),
            ExtractError::InvalidSidecar { .. }
        ));
    }

    #[test]
    fn potree_levels_token() {
        assert_eq!(potree_levels("scan_levels_7"), Some(7));
        assert_eq!(potree_levels("scan_levels_x"), None);
        assert_eq!(potree_levels("scan"), None);
    }

    #[test]
    fn osg_location_prefers_offsets_then_picture_then_footprint() {
        let pc = RawMetadata::PointCloud(PointCloudMeta {
            srid: Some(32633),
            ..Default::default()
        });
        let own = Some(Vector3 { x: 1.0, y: 2.0, z: 3.0 });
        let base = Some(Vector3 { x: 100.0, y: 200.0, z: 300.0 });
        assert_eq!(
            osg_location(&pc, own, base, None),
            Some(OsgLocation {
                srid: Some(32633),
                x: 101.0,
                y: 202.0,
                z: 303.0
            })
        );

        let pic = RawMetadata::Picture(PictureMeta {
            srid: Some(4326),
            position: Some(Vector3 { x: 5.0, y: 6.0, z: 7.0 }),
            ..Default::default()
        });
        assert_eq!(
            osg_location(&pic, None, None, None).map(|l| (l.x, l.y, l.z)),
            Some((5.0, 6.0, 7.0))
        );

        let item = Item {
            id: 7,
            background: false,
            footprint: Some("SRID=32633;POLYGON((0 0,4 0,4 2,0 2,0 0))".to_string()),
            min_z: Some(10.0),
            max_z: Some(20.0),
            z_points: None,
        };
        assert_eq!(
            osg_location(&pc, own, None, Some(&item)),
            Some(OsgLocation {
                srid: Some(32633),
                x: 2.0,
                y: 1.0,
                z: 15.0
            })
        );

        let mesh = RawMetadata::Mesh(MeshMeta::default());
        assert_eq!(osg_location(&mesh, own, base, None), None);
    }
}
