use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config value: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("item not found: {item_id}")]
    ItemNotFound { item_id: i64 },

    #[error("schema migration required: current={current}, required={required}")]
    SchemaMigrationRequired { current: u32, required: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Convenience constructor for SQLite errors. Use with `.map_err(StateError::sqlite)`.
    pub fn sqlite<E: std::fmt::Display>(e: E) -> Self {
        Self::Sqlite(e.to_string())
    }
}

/// A path that does not fit the `<STAGE>/<TYPE>/<KIND>[/<PERIOD>][/S<id>]/<leaf>` layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("path is outside the data root: {path}")]
    OutsideRoot { path: PathBuf },

    #[error("missing {segment} segment in {path}")]
    MissingSegment {
        path: PathBuf,
        segment: &'static str,
    },

    #[error("unknown {segment} marker '{value}' in {path}")]
    UnknownMarker {
        path: PathBuf,
        segment: &'static str,
        value: String,
    },

    #[error("contradictory markers in {path}: {reason}")]
    Contradictory { path: PathBuf, reason: String },

    #[error("invalid site folder '{value}' in {path}")]
    InvalidSiteId { path: PathBuf, value: String },
}

/// Type-specific parsing of a newly discovered artifact failed; nothing is written.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no {expected} file found in {path}")]
    MissingFile {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("invalid point cloud header in {path}: {reason}")]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("invalid side-car metadata {path}: {reason}")]
    InvalidSidecar { path: PathBuf, reason: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by the external geometric cutout collaborator.
#[derive(Error, Debug)]
pub enum CutoutError {
    #[error("no item found with id {item_id}")]
    ItemNotFound { item_id: i64 },

    #[error("item {item_id} has no usable footprint")]
    NoFootprint { item_id: i64 },

    #[error("no source files found in {dir}")]
    NoSourceFiles { dir: PathBuf },

    #[error("extraction tool unavailable: {tool}: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("no points intersect the footprint of item {item_id}")]
    NoPoints { item_id: i64 },

    #[error("malformed tool output: {0}")]
    MalformedOutput(String),

    #[error("catalog error: {0}")]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors that abort a reconciliation run. Everything per-item is
/// handled inside the engine and only shows up in the summary.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("catalog unavailable: {0}")]
    Catalog(#[from] StateError),

    #[error("data root is not readable: {path}: {reason}")]
    UnreadableRoot { path: PathBuf, reason: String },
}
