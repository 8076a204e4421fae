mod commands;

use clap::{Parser, Subcommand};
use relic_core::config::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "relic",
    version,
    about = "Catalog reconciliation for archaeological 3D data",
    long_about = "Relic keeps a SQLite catalog of raw captures (point clouds, meshes,\n\
        pictures) and their OSG, POTREE and NEXUS conversions in step with the\n\
        data tree on disk, and recomputes per-site elevation extents.\n\n\
        Quick start:\n  \
        relic --data-root /data sync\n  \
        relic import-footprints footprints.json\n  \
        relic --data-root /data recompute-z --workers 8\n  \
        relic doctor"
)]
struct Cli {
    /// Enable verbose logging (set log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: <data-root>/.relic/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Root of the data tree (default: current directory)
    #[arg(long, global = true)]
    data_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the catalog with the data tree
    ///
    /// Scans RAW, OSG, POTREE and NEXUS in that order, inserting new leaves
    /// and refreshing known ones, then sweeps records of vanished leaves in
    /// the reverse order. Raw records with remaining conversions are kept.
    ///
    /// Examples:
    ///   relic sync
    ///   relic sync --stages raw,osg --types pc,mesh
    Sync {
        /// Comma-separated stages (raw, osg, potree, nexus)
        #[arg(long)]
        stages: Option<String>,

        /// Comma-separated artifact types (pc, mesh, picture)
        #[arg(long)]
        types: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute item elevation extents from the background point clouds
    ///
    /// Runs a cutout of every item footprint (or only the given items) on a
    /// pool of worker threads and stores min/max z and the point count.
    ///
    /// Examples:
    ///   relic recompute-z
    ///   relic recompute-z --workers 8 --buffer 5
    ///   relic recompute-z --item 12 --item 14
    RecomputeZ {
        /// Number of worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Buffer grown around each footprint before the cutout
        #[arg(long)]
        buffer: Option<f64>,

        /// Folder holding the background LAS/LAZ tiles
        #[arg(long)]
        source_dir: Option<String>,

        /// Restrict to these item ids (repeatable)
        #[arg(long = "item")]
        items: Vec<i64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List catalogued raw artifacts
    ///
    /// Example: relic list --type mesh
    List {
        /// Only this artifact type (pc, mesh, picture)
        #[arg(long = "type")]
        artifact_type: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load item footprints from a JSON file
    ///
    /// The file holds an array of {"item_id": 7, "wkt": "POLYGON((...))"}.
    /// Missing items are created; existing ones get their footprint replaced.
    ///
    /// Example: relic import-footprints footprints.json
    ImportFootprints {
        /// JSON file to import
        file: String,
    },
    /// Check catalog health and data root layout
    ///
    /// Example: relic doctor
    Doctor,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_root = resolve_path(cli.data_root)?;
    let config_file = cli.config.as_deref().map(Path::new);
    let config = Config::load_with_file(Some(&data_root), config_file)?;

    let filter = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync {
            stages,
            types,
            json,
        } => {
            commands::sync::run(&data_root, &config, stages.as_deref(), types.as_deref(), json)?;
        }
        Commands::RecomputeZ {
            workers,
            buffer,
            source_dir,
            items,
            json,
        } => {
            let overrides = commands::recompute::Overrides {
                workers,
                buffer,
                source_dir,
            };
            commands::recompute::run(&config, overrides, &items, json)?;
        }
        Commands::List {
            artifact_type,
            json,
        } => {
            commands::list::run(&config, artifact_type.as_deref(), json)?;
        }
        Commands::ImportFootprints { file } => {
            commands::import_footprints::run(&config, Path::new(&file))?;
        }
        Commands::Doctor => {
            commands::doctor::run(&data_root, &config)?;
        }
    }

    Ok(())
}

fn resolve_path(path: Option<String>) -> anyhow::Result<PathBuf> {
    match path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(std::env::current_dir()?),
    }
}
