/// Item identifier reserved for the shared background.
pub const BACKGROUND_ITEM_ID: i64 = -1;

/// Prefix of a site folder (`S<id>`).
pub const SITE_FOLDER_PREFIX: &str = "S";

/// Stamp file touched in the OSG stage root after a sync that covered it.
pub const DEFAULT_STAMP_FILE: &str = "LAST_MOD";

/// Default data directory name under home.
pub const DEFAULT_DATA_DIR: &str = ".relic";

/// Per-data-root config file name.
pub const PROJECT_CONFIG_FILE: &str = ".relic/config.toml";

/// SQLite catalog file name.
pub const CATALOG_DB_FILE: &str = "catalog.db";

/// Default buffer (in CRS units) grown around a footprint before a cutout.
pub const DEFAULT_CUTOUT_BUFFER: f64 = 2.0;

/// Default number of bulk recompute workers.
pub const DEFAULT_RECOMPUTE_WORKERS: usize = 4;
