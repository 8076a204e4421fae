use super::open_catalog;
use anyhow::{Result, bail};
use relic_core::config::Config;
use relic_core::time::format_ns;
use relic_core::types::ArtifactType;
use relic_state::raw;

pub fn run(config: &Config, artifact_type: Option<&str>, json: bool) -> Result<()> {
    let filter = match artifact_type {
        Some(name) => match ArtifactType::parse_type(name) {
            Some(t) => Some(t),
            None => bail!("Unknown artifact type '{name}' (expected pc, mesh or picture)"),
        },
        None => None,
    };

    let conn = open_catalog(config)?;
    let artifacts = raw::list(&conn, filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("No raw artifacts catalogued.");
        return Ok(());
    }
    for a in &artifacts {
        println!(
            "{:>6}  item {:>6}  {:<11}  {}  (seen {})",
            a.id,
            a.item_id,
            a.artifact_type().as_str(),
            a.abs_path,
            format_ns(a.last_check)
        );
    }
    println!();
    println!("{} raw artifact(s)", artifacts.len());
    Ok(())
}
