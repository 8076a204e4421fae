use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{BACKGROUND_ITEM_ID, SITE_FOLDER_PREFIX};

/// One tier of the derivation pipeline, named after its top-level folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Raw,
    Osg,
    Potree,
    Nexus,
}

impl Stage {
    /// Least-derived first. Scans walk this order, sweeps walk it reversed.
    pub const ALL: [Stage; 4] = [Stage::Raw, Stage::Osg, Stage::Potree, Stage::Nexus];

    /// Stages whose records reference a raw artifact.
    pub const DERIVED: [Stage; 3] = [Stage::Osg, Stage::Potree, Stage::Nexus];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Osg => "osg",
            Self::Potree => "potree",
            Self::Nexus => "nexus",
        }
    }

    /// Folder marker used in the directory layout.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Osg => "OSG",
            Self::Potree => "POTREE",
            Self::Nexus => "NEXUS",
        }
    }

    pub fn from_marker(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.marker() == segment)
    }

    /// Accepts the marker, the lowercase name, or the single-letter shorthand.
    pub fn parse_stage(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "r" => Some(Self::Raw),
            "osg" | "o" => Some(Self::Osg),
            "potree" | "pot" | "p" => Some(Self::Potree),
            "nexus" | "nex" | "n" => Some(Self::Nexus),
            _ => None,
        }
    }

    pub fn is_derived(&self) -> bool {
        !matches!(self, Self::Raw)
    }

    /// Whether artifacts of `artifact_type` can live in this stage.
    pub fn supports(&self, artifact_type: ArtifactType) -> bool {
        match self {
            Self::Raw | Self::Osg => true,
            Self::Potree => artifact_type == ArtifactType::PointCloud,
            Self::Nexus => artifact_type == ArtifactType::Mesh,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    PointCloud,
    Mesh,
    Picture,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 3] = [
        ArtifactType::PointCloud,
        ArtifactType::Mesh,
        ArtifactType::Picture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointCloud => "point_cloud",
            Self::Mesh => "mesh",
            Self::Picture => "picture",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::PointCloud => "PC",
            Self::Mesh => "MESH",
            Self::Picture => "PICT",
        }
    }

    pub fn from_marker(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.marker() == segment)
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "point_cloud" | "pointcloud" | "pc" | "p" => Some(Self::PointCloud),
            "mesh" | "m" => Some(Self::Mesh),
            "picture" | "pict" | "pic" | "i" => Some(Self::Picture),
            _ => None,
        }
    }

    /// Periods a leaf of this type may be filed under. Point clouds have none.
    pub fn periods(&self) -> &'static [Period] {
        match self {
            Self::PointCloud => &[],
            Self::Mesh => &[Period::Current, Period::ArchaeologicalReconstruction],
            Self::Picture => &[Period::Current, Period::Historical],
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a leaf belongs to the shared background or to a numbered site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Background,
    Site,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Background, ItemKind::Site];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Site => "site",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Background => "BACK",
            Self::Site => "SITE",
        }
    }

    pub fn from_marker(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.marker() == segment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Current,
    Historical,
    ArchaeologicalReconstruction,
}

impl Period {
    pub const ALL: [Period; 3] = [
        Period::Current,
        Period::Historical,
        Period::ArchaeologicalReconstruction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Historical => "historical",
            Self::ArchaeologicalReconstruction => "archaeological_reconstruction",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Current => "CURR",
            Self::Historical => "HIST",
            Self::ArchaeologicalReconstruction => "ARCH_REC",
        }
    }

    pub fn from_marker(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.marker() == segment)
    }
}

/// Semantic descriptor of one leaf artifact, as recovered from its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub stage: Stage,
    pub artifact_type: ArtifactType,
    pub kind: ItemKind,
    pub period: Option<Period>,
    /// Present exactly when `kind` is `Site`.
    pub site_id: Option<i64>,
    /// Leaf folder (or file) name.
    pub leaf: String,
}

impl ArtifactLocation {
    /// Owning Item: the site number, or the background sentinel.
    pub fn item_id(&self) -> i64 {
        self.site_id.unwrap_or(BACKGROUND_ITEM_ID)
    }

    pub fn is_current(&self) -> bool {
        self.period == Some(Period::Current)
    }

    /// Folder holding the leaf, relative to the data root.
    pub fn parent_relative(&self) -> PathBuf {
        let mut rel = PathBuf::from(self.stage.marker());
        rel.push(self.artifact_type.marker());
        rel.push(self.kind.marker());
        if let Some(period) = self.period {
            rel.push(period.marker());
        }
        if let Some(site_id) = self.site_id {
            rel.push(format!("{SITE_FOLDER_PREFIX}{site_id}"));
        }
        rel
    }

    /// Absolute path of the leaf under `data_root`.
    pub fn to_path(&self, data_root: &Path) -> PathBuf {
        data_root.join(self.parent_relative()).join(&self.leaf)
    }

    /// Same leaf, relocated to another stage.
    pub fn in_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}
