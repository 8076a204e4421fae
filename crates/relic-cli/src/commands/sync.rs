use super::{open_catalog, split_csv};
use anyhow::{Context, Result, bail};
use relic_core::config::Config;
use relic_sync::engine::{SyncEngine, SyncOptions, SyncSummary};
use std::path::Path;

pub fn run(
    data_root: &Path,
    config: &Config,
    stages: Option<&str>,
    types: Option<&str>,
    json: bool,
) -> Result<()> {
    let data_root = std::fs::canonicalize(data_root)
        .with_context(|| format!("Failed to resolve data root {}", data_root.display()))?;

    let mut sync_config = config.sync.clone();
    if let Some(stages) = stages {
        sync_config.stages = split_csv(stages);
    }
    if let Some(types) = types {
        sync_config.artifact_types = split_csv(types);
    }
    let options = SyncOptions::from_config(&sync_config);
    if options.stages.is_empty() {
        bail!("No valid stage selected (expected raw, osg, potree or nexus)");
    }
    if options.artifact_types.is_empty() {
        bail!("No valid artifact type selected (expected pc, mesh or picture)");
    }

    let conn = open_catalog(config)?;
    let summary = SyncEngine::new(&conn, &data_root, options).run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&data_root, &summary);
    }
    Ok(())
}

fn print_summary(data_root: &Path, summary: &SyncSummary) {
    println!("Sync complete");
    println!("  Data root: {}", data_root.display());
    println!("  Epoch: {}", relic_core::time::format_ns(summary.epoch));
    println!();
    println!(
        "  {:<8} {:>8} {:>9} {:>6} {:>8} {:>7} {:>7} {:>8} {:>10} {:>6}",
        "stage", "inserted", "refreshed", "stale", "orphaned", "skipped", "deleted", "retained", "violations", "errors"
    );
    for (stage, c) in &summary.stages {
        println!(
            "  {:<8} {:>8} {:>9} {:>6} {:>8} {:>7} {:>7} {:>8} {:>10} {:>6}",
            stage.as_str(),
            c.inserted,
            c.refreshed,
            c.stale_warnings,
            c.orphan_warnings,
            c.skipped,
            c.deleted,
            c.retained,
            c.violations,
            c.errors
        );
    }
    let t = summary.totals();
    println!(
        "  {:<8} {:>8} {:>9} {:>6} {:>8} {:>7} {:>7} {:>8} {:>10} {:>6}",
        "total",
        t.inserted,
        t.refreshed,
        t.stale_warnings,
        t.orphan_warnings,
        t.skipped,
        t.deleted,
        t.retained,
        t.violations,
        t.errors
    );
}
