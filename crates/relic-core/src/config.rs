use crate::constants;
use crate::error::ConfigError;
use crate::types::{ArtifactType, Stage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub recompute: RecomputeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// SQLite catalog path. Empty means `~/.relic/catalog.db`.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Stages to reconcile, by name (`raw`, `osg`, `potree`, `nexus`).
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,
    /// Artifact types to include (`point_cloud`, `mesh`, `picture`).
    #[serde(default = "default_artifact_types")]
    pub artifact_types: Vec<String>,
    /// Stamp file touched in the OSG stage root after a run. Empty disables it.
    #[serde(default = "default_stamp_file")]
    pub stamp_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecomputeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Buffer grown around each footprint before the cutout.
    #[serde(default = "default_buffer")]
    pub buffer: f64,
    /// Folder holding the background LAS/LAZ tiles. Empty means the first
    /// background point cloud under `<data_root>/RAW/PC/BACK`.
    #[serde(default)]
    pub source_dir: String,
    #[serde(default = "default_lasmerge")]
    pub lasmerge: String,
    #[serde(default = "default_lasinfo")]
    pub lasinfo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_busy_timeout() -> u32 {
    5000
}
fn default_cache_size() -> i32 {
    -64000
}
fn default_stages() -> Vec<String> {
    Stage::ALL.iter().map(|s| s.as_str().to_string()).collect()
}
fn default_artifact_types() -> Vec<String> {
    ArtifactType::ALL
        .iter()
        .map(|t| t.as_str().to_string())
        .collect()
}
fn default_stamp_file() -> String {
    constants::DEFAULT_STAMP_FILE.to_string()
}
fn default_workers() -> usize {
    constants::DEFAULT_RECOMPUTE_WORKERS
}
fn default_buffer() -> f64 {
    constants::DEFAULT_CUTOUT_BUFFER
}
fn default_lasmerge() -> String {
    "lasmerge".to_string()
}
fn default_lasinfo() -> String {
    "lasinfo".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            busy_timeout_ms: default_busy_timeout(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            artifact_types: default_artifact_types(),
            stamp_file: default_stamp_file(),
        }
    }
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buffer: default_buffer(),
            source_dir: String::new(),
            lasmerge: default_lasmerge(),
            lasinfo: default_lasinfo(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Selected stages in dependency order; unknown names are dropped with a warning.
    pub fn selected_stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self
            .stages
            .iter()
            .filter_map(|name| {
                let parsed = Stage::parse_stage(name);
                if parsed.is_none() {
                    warn!(stage = %name, "Ignoring unknown stage in sync.stages");
                }
                parsed
            })
            .collect();
        stages.sort();
        stages.dedup();
        stages
    }

    pub fn selected_artifact_types(&self) -> Vec<ArtifactType> {
        let mut types: Vec<ArtifactType> = self
            .artifact_types
            .iter()
            .filter_map(|name| {
                let parsed = ArtifactType::parse_type(name);
                if parsed.is_none() {
                    warn!(artifact_type = %name, "Ignoring unknown type in sync.artifact_types");
                }
                parsed
            })
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

impl Config {
    pub fn load(data_root: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_file(data_root, None)
    }

    pub fn load_with_file(
        data_root: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        // Start with empty TOML value, then layer on each config file.
        // Only explicitly-set fields override previous layers.
        let mut merged = toml::Value::Table(toml::map::Map::new());

        // Lowest priority: global config
        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(constants::DEFAULT_DATA_DIR).join("config.toml");
            if global_path.exists() {
                let raw = load_toml_value(&global_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        // Data root config
        if let Some(root) = data_root {
            let project_path = root.join(constants::PROJECT_CONFIG_FILE);
            if project_path.exists() {
                let raw = load_toml_value(&project_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        // Explicit config file from --config flag
        if let Some(cf) = config_file {
            if !cf.exists() {
                return Err(ConfigError::NotFound {
                    path: cf.display().to_string(),
                });
            }
            let raw = load_toml_value(cf)?;
            merge_toml_values(&mut merged, &raw);
        }

        let config_str =
            toml::to_string(&merged).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Highest priority: RELIC_<SECTION>_<KEY>
        apply_env_overrides(&mut config);
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        if self.recompute.workers == 0 {
            warn!(
                value = self.recompute.workers,
                default = default_workers(),
                "recompute.workers must be >= 1; using default"
            );
            self.recompute.workers = default_workers();
        }
        if !self.recompute.buffer.is_finite() || self.recompute.buffer < 0.0 {
            warn!(
                value = self.recompute.buffer,
                default = default_buffer(),
                "recompute.buffer must be a non-negative number; using default"
            );
            self.recompute.buffer = default_buffer();
        }
        self.logging.level = normalize_log_level(&self.logging.level);
    }

    /// Resolved catalog path: configured path, else `~/.relic/catalog.db`.
    pub fn catalog_path(&self) -> PathBuf {
        if !self.catalog.path.is_empty() {
            return expand_home(&self.catalog.path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(constants::DEFAULT_DATA_DIR)
            .join(constants::CATALOG_DB_FILE)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

fn normalize_log_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
    .to_string()
}

fn parse_csv_env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("RELIC_CATALOG_PATH") {
        config.catalog.path = v;
    }
    if let Ok(v) = std::env::var("RELIC_CATALOG_BUSY_TIMEOUT_MS")
        && let Ok(n) = v.parse()
    {
        config.catalog.busy_timeout_ms = n;
    }
    if let Ok(v) = std::env::var("RELIC_CATALOG_CACHE_SIZE")
        && let Ok(n) = v.parse()
    {
        config.catalog.cache_size = n;
    }
    if let Ok(v) = std::env::var("RELIC_SYNC_STAGES") {
        config.sync.stages = parse_csv_env_list(&v);
    }
    if let Ok(v) = std::env::var("RELIC_SYNC_ARTIFACT_TYPES") {
        config.sync.artifact_types = parse_csv_env_list(&v);
    }
    if let Ok(v) = std::env::var("RELIC_SYNC_STAMP_FILE") {
        config.sync.stamp_file = v;
    }
    if let Ok(v) = std::env::var("RELIC_RECOMPUTE_WORKERS")
        && let Ok(n) = v.parse()
    {
        config.recompute.workers = n;
    }
    if let Ok(v) = std::env::var("RELIC_RECOMPUTE_BUFFER")
        && let Ok(n) = v.parse()
    {
        config.recompute.buffer = n;
    }
    if let Ok(v) = std::env::var("RELIC_RECOMPUTE_SOURCE_DIR") {
        config.recompute.source_dir = v;
    }
    if let Ok(v) = std::env::var("RELIC_RECOMPUTE_LASMERGE") {
        config.recompute.lasmerge = v;
    }
    if let Ok(v) = std::env::var("RELIC_RECOMPUTE_LASINFO") {
        config.recompute.lasinfo = v;
    }
    if let Ok(v) = std::env::var("RELIC_LOGGING_LEVEL") {
        config.logging.level = v;
    }
}

fn load_toml_value(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<toml::Value>()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn merge_toml_values(base: &mut toml::Value, overlay: &toml::Value) {
    if let (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) = (base, overlay) {
        for (key, overlay_val) in overlay_map {
            if let Some(base_val) = base_map.get_mut(key) {
                // Both have this key: recurse if both are tables, otherwise overwrite
                if base_val.is_table() && overlay_val.is_table() {
                    merge_toml_values(base_val, overlay_val);
                } else {
                    *base_val = overlay_val.clone();
                }
            } else {
                base_map.insert(key.clone(), overlay_val.clone());
            }
        }
    }
}
