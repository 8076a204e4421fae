use super::open_catalog;
use anyhow::{Context, Result};
use relic_core::config::Config;
use relic_state::{db, items};
use relic_sync::cutout::{self, CutoutExtractor, LasToolsCutout};
use relic_sync::recompute::{RecomputeOutcome, RecomputePool};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line values that take precedence over `[recompute]`.
#[derive(Debug, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub buffer: Option<f64>,
    pub source_dir: Option<String>,
}

pub fn run(config: &Config, overrides: Overrides, item_ids: &[i64], json: bool) -> Result<()> {
    let mut settings = config.recompute.clone();
    if let Some(workers) = overrides.workers {
        settings.workers = workers.max(1);
    }
    if let Some(buffer) = overrides.buffer {
        settings.buffer = buffer;
    }
    if let Some(dir) = overrides.source_dir {
        settings.source_dir = dir;
    }

    let conn = open_catalog(config)?;
    let source_dir = if settings.source_dir.trim().is_empty() {
        cutout::default_source_dir(&conn)?.context(
            "No recompute.source_dir configured and no background point cloud in the catalog",
        )?
    } else {
        PathBuf::from(settings.source_dir.trim())
    };
    let ids = if item_ids.is_empty() {
        items::recompute_candidates(&conn)?
    } else {
        item_ids.to_vec()
    };
    drop(conn);

    let db_path = config.catalog_path();
    let catalog = config.catalog.clone();
    let extractor: Arc<dyn CutoutExtractor> = Arc::new(LasToolsCutout::new(&source_dir, &settings));
    let pool = RecomputePool::new(settings.workers, extractor, move || {
        db::open_from_config(&db_path, &catalog)
    });
    let report = pool.run(&ids).context("Failed to start recompute workers")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Recompute complete");
    println!("  Source: {}", source_dir.display());
    println!("  Workers: {}", report.workers);
    println!(
        "  Items: {} updated, {} failed ({} ms)",
        report.updated(),
        report.failed(),
        report.elapsed_ms
    );
    for item in &report.items {
        match &item.outcome {
            RecomputeOutcome::Updated {
                min_z,
                max_z,
                points,
            } => println!(
                "  {:>8}  z {:.2} .. {:.2}  ({} points)",
                item.item_id, min_z, max_z, points
            ),
            RecomputeOutcome::Failed { reason } => {
                println!("  {:>8}  FAIL: {}", item.item_id, reason)
            }
        }
    }
    Ok(())
}
