use relic_core::constants::SITE_FOLDER_PREFIX;
use relic_core::error::ClassificationError;
use relic_core::types::{ArtifactLocation, ArtifactType, ItemKind, Period, Stage};
use std::path::{Component, Path, PathBuf};

/// Maps leaf paths under a data root to their semantic location.
///
/// Layout: `<root>/<STAGE>/<TYPE>/<KIND>[/<PERIOD>][/S<id>]/<leaf>`.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    data_root: PathBuf,
}

impl PathClassifier {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn classify(&self, path: &Path) -> Result<ArtifactLocation, ClassificationError> {
        let outside = || ClassificationError::OutsideRoot {
            path: path.to_path_buf(),
        };
        let relative = path.strip_prefix(&self.data_root).map_err(|_| outside())?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }

        let missing = |segment: &'static str| ClassificationError::MissingSegment {
            path: path.to_path_buf(),
            segment,
        };
        let unknown = |segment: &'static str, value: &str| ClassificationError::UnknownMarker {
            path: path.to_path_buf(),
            segment,
            value: value.to_string(),
        };
        let contradictory = |reason: String| ClassificationError::Contradictory {
            path: path.to_path_buf(),
            reason,
        };

        let stage_seg = segments.first().ok_or_else(|| missing("stage"))?;
        let stage = Stage::from_marker(stage_seg).ok_or_else(|| unknown("stage", stage_seg))?;

        let type_seg = segments.get(1).ok_or_else(|| missing("type"))?;
        let artifact_type =
            ArtifactType::from_marker(type_seg).ok_or_else(|| unknown("type", type_seg))?;
        if !stage.supports(artifact_type) {
            return Err(contradictory(format!(
                "{} does not hold {} artifacts",
                stage.marker(),
                artifact_type.marker()
            )));
        }

        let kind_seg = segments.get(2).ok_or_else(|| missing("kind"))?;
        let kind = ItemKind::from_marker(kind_seg).ok_or_else(|| unknown("kind", kind_seg))?;
        let other_kind = match kind {
            ItemKind::Background => ItemKind::Site,
            ItemKind::Site => ItemKind::Background,
        };
        if segments[3..].iter().any(|s| s == other_kind.marker()) {
            return Err(contradictory(format!(
                "both {} and {} markers present",
                ItemKind::Background.marker(),
                ItemKind::Site.marker()
            )));
        }

        let mut idx = 3;
        let allowed = artifact_type.periods();
        let period = if allowed.is_empty() {
            if let Some(seg) = segments.get(idx)
                && Period::from_marker(seg).is_some()
                && segments.len() > idx + 1
            {
                return Err(contradictory(format!(
                    "{} artifacts carry no period but found {seg}",
                    artifact_type.marker()
                )));
            }
            None
        } else {
            let seg = segments.get(idx).ok_or_else(|| missing("period"))?;
            let period = Period::from_marker(seg).ok_or_else(|| unknown("period", seg))?;
            if !allowed.contains(&period) {
                return Err(contradictory(format!(
                    "{} is not a valid period for {}",
                    period.marker(),
                    artifact_type.marker()
                )));
            }
            idx += 1;
            Some(period)
        };

        let site_id = match kind {
            ItemKind::Site => {
                let seg = segments.get(idx).ok_or_else(|| missing("site"))?;
                let id = parse_site_folder(seg).ok_or_else(|| ClassificationError::InvalidSiteId {
                    path: path.to_path_buf(),
                    value: seg.clone(),
                })?;
                idx += 1;
                Some(id)
            }
            ItemKind::Background => {
                if let Some(seg) = segments.get(idx)
                    && parse_site_folder(seg).is_some()
                    && segments.len() > idx + 1
                {
                    return Err(contradictory(format!(
                        "background path carries site folder {seg}"
                    )));
                }
                None
            }
        };

        let leaf = segments.get(idx).ok_or_else(|| missing("leaf"))?.clone();
        if segments.len() > idx + 1 {
            return Err(contradictory(format!(
                "unexpected segments after leaf {leaf}"
            )));
        }

        Ok(ArtifactLocation {
            stage,
            artifact_type,
            kind,
            period,
            site_id,
            leaf,
        })
    }
}

/// `S<int>` folder name to site id. Site ids are positive.
pub fn parse_site_folder(segment: &str) -> Option<i64> {
    let digits = segment.strip_prefix(SITE_FOLDER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok().filter(|&id| id > 0)
}
