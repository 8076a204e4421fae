use anyhow::Result;
use relic_core::config::Config;
use relic_core::types::Stage;
use relic_state::schema::CURRENT_SCHEMA_VERSION;
use relic_state::{artifacts, db, items, schema};
use std::path::Path;

pub fn run(data_root: &Path, config: &Config) -> Result<()> {
    println!("Relic Doctor");
    println!("==================");
    println!();

    let mut all_ok = true;

    let db_path = config.catalog_path();
    print!("SQLite catalog ({}) ... ", db_path.display());
    if db_path.exists() {
        match db::open_from_config(&db_path, &config.catalog) {
            Ok(conn) => {
                match db::check_sqlite_health(&conn) {
                    Ok((true, _)) => println!("OK"),
                    Ok((false, detail)) => {
                        println!("WARN: {}", detail.unwrap_or_default());
                        all_ok = false;
                    }
                    Err(e) => {
                        println!("FAIL: {}", e);
                        all_ok = false;
                    }
                }

                print!("Schema version ... ");
                match schema::current_version(&conn) {
                    Ok(v) if v == CURRENT_SCHEMA_VERSION => println!("OK (v{})", v),
                    Ok(v) => {
                        println!(
                            "OUTDATED (v{}, expected v{}) - run `relic sync` to migrate",
                            v, CURRENT_SCHEMA_VERSION
                        );
                        all_ok = false;
                    }
                    Err(e) => {
                        println!("FAIL: {}", e);
                        all_ok = false;
                    }
                }

                if let Ok(counts) = artifacts::stage_counts(&conn) {
                    println!();
                    println!("Catalog records:");
                    for (stage, count) in counts {
                        println!("  {:<8} {}", stage.as_str(), count);
                    }
                }
                if let Ok(all_items) = items::list_items(&conn) {
                    let with_extent = all_items.iter().filter(|i| i.min_z.is_some()).count();
                    println!(
                        "  items    {} ({} with elevation extent)",
                        all_items.len(),
                        with_extent
                    );
                }
            }
            Err(e) => {
                println!("FAIL: {}", e);
                all_ok = false;
            }
        }
    } else {
        println!("MISSING - run `relic sync`");
        all_ok = false;
    }

    println!();
    print!("Data root ({}) ... ", data_root.display());
    if data_root.is_dir() {
        println!("OK");
        for stage in Stage::ALL {
            let dir = data_root.join(stage.marker());
            print!("  {} ... ", stage.marker());
            if dir.is_dir() {
                println!("OK");
            } else {
                println!("MISSING");
            }
        }
    } else {
        println!("MISSING");
        all_ok = false;
    }

    println!();
    if all_ok {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. See above for details.");
    }

    Ok(())
}
