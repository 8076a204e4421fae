//! Elevation cutouts: the points of the background tiles that fall inside an
//! item's (buffered) footprint envelope, summarised as a vertical extent.

use crate::extract;
use crate::geometry::envelope_from_wkt;
use relic_core::config::RecomputeConfig;
use relic_core::error::{CutoutError, StateError};
use relic_state::{items, raw};
use rusqlite::Connection;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CutoutResult {
    pub min_z: f64,
    pub max_z: f64,
    pub points: u64,
}

/// Computes the vertical extent of one item. Implementations must be usable
/// from several worker threads at once; each call gets the worker's own
/// catalog connection.
pub trait CutoutExtractor: Send + Sync {
    fn extract(&self, conn: &Connection, item_id: i64) -> Result<CutoutResult, CutoutError>;
}

/// Cutout through LAStools: `lasmerge` clips the tiles, `lasinfo` reports the extent.
#[derive(Debug, Clone)]
pub struct LasToolsCutout {
    source_dir: PathBuf,
    buffer: f64,
    lasmerge: String,
    lasinfo: String,
}

impl LasToolsCutout {
    pub fn new(source_dir: impl Into<PathBuf>, config: &RecomputeConfig) -> Self {
        Self {
            source_dir: source_dir.into(),
            buffer: config.buffer,
            lasmerge: config.lasmerge.clone(),
            lasinfo: config.lasinfo.clone(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    fn run_tool(&self, tool: &str, args: &[String]) -> Result<String, CutoutError> {
        debug!(tool, args = ?args, "Running cutout tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .map_err(|e| CutoutError::ToolUnavailable {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(CutoutError::ToolUnavailable {
                tool: tool.to_string(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        // lasinfo writes its report to stderr
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl CutoutExtractor for LasToolsCutout {
    fn extract(&self, conn: &Connection, item_id: i64) -> Result<CutoutResult, CutoutError> {
        let item = items::get_item(conn, item_id)?.ok_or(CutoutError::ItemNotFound { item_id })?;
        let envelope = item
            .footprint
            .as_deref()
            .and_then(envelope_from_wkt)
            .ok_or(CutoutError::NoFootprint { item_id })?
            .grow(self.buffer);

        let sources = extract::point_cloud_files(&self.source_dir).map_err(|_| {
            CutoutError::NoSourceFiles {
                dir: self.source_dir.clone(),
            }
        })?;
        if sources.is_empty() {
            return Err(CutoutError::NoSourceFiles {
                dir: self.source_dir.clone(),
            });
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("relic-cutout-{item_id}-"))
            .tempdir()?;
        let list = scratch.path().join("sources.list");
        let clipped = scratch.path().join("cutout.las");
        let listing: String = sources
            .iter()
            .map(|p| format!("{}\n", p.display()))
            .collect();
        fs::write(&list, listing)?;

        let mut merge_args = vec![
            "-lof".to_string(),
            list.display().to_string(),
            "-inside".to_string(),
        ];
        merge_args.extend(
            [envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y]
                .iter()
                .map(|v| v.to_string()),
        );
        merge_args.push("-o".to_string());
        merge_args.push(clipped.display().to_string());
        self.run_tool(&self.lasmerge, &merge_args)?;

        if !clipped.exists() {
            return Err(CutoutError::ToolUnavailable {
                tool: self.lasmerge.clone(),
                reason: "no output file produced".to_string(),
            });
        }

        let mut info_args = vec!["-i".to_string(), clipped.display().to_string()];
        info_args.extend(["-nv", "-nmm", "-histo", "z", "10000000"].map(String::from));
        let report = self.run_tool(&self.lasinfo, &info_args)?;
        let result = parse_lasinfo(&report)?;
        if result.points == 0 {
            return Err(CutoutError::NoPoints { item_id });
        }
        Ok(result)
    }
}

/// Pull `number of point records`, `min x y z` and `max x y z` out of a lasinfo report.
pub fn parse_lasinfo(report: &str) -> Result<CutoutResult, CutoutError> {
    let mut points = None;
    let mut min_z = None;
    let mut max_z = None;

    for line in report.lines() {
        let line = line.trim();
        let Some((label, values)) = line.split_once(':') else {
            continue;
        };
        let last = values.split_whitespace().last();
        match label.trim() {
            "number of point records" => points = last.and_then(|v| v.parse::<u64>().ok()),
            "min x y z" => min_z = last.and_then(|v| v.parse::<f64>().ok()),
            "max x y z" => max_z = last.and_then(|v| v.parse::<f64>().ok()),
            _ => {}
        }
    }

    let points = points.ok_or_else(|| {
        CutoutError::MalformedOutput("missing 'number of point records'".to_string())
    })?;
    if points == 0 {
        // an empty clip reports no usable bounds
        return Ok(CutoutResult {
            min_z: 0.0,
            max_z: 0.0,
            points,
        });
    }
    match (min_z, max_z) {
        (Some(min_z), Some(max_z)) => Ok(CutoutResult {
            min_z,
            max_z,
            points,
        }),
        _ => Err(CutoutError::MalformedOutput(
            "missing 'min x y z' or 'max x y z'".to_string(),
        )),
    }
}

/// Default cutout source: the folder holding the first background point cloud.
pub fn default_source_dir(conn: &Connection) -> Result<Option<PathBuf>, StateError> {
    let Some(first) = raw::background_point_clouds(conn)?.into_iter().next() else {
        return Ok(None);
    };
    let path = PathBuf::from(&first.abs_path);
    if path.is_dir() {
        Ok(Some(path))
    } else {
        Ok(path.parent().map(Path::to_path_buf))
    }
}
