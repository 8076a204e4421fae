mod common;

use common::{Fixture, hours_from_now, set_mtime};
use relic_core::types::{ArtifactType, Stage};
use relic_state::{artifacts, derived, dependents, items, raw};
use relic_sync::engine::SyncOptions;
use std::fs;

const P1: &str = "RAW/PC/SITE/S7/scan1";
const P2: &str = "OSG/PC/SITE/S7/scan1";

fn all_last_checks(f: &Fixture) -> Vec<i64> {
    let mut stmt = f
        .conn
        .prepare(
            "SELECT last_check FROM raw_artifacts
             UNION ALL SELECT last_check FROM osg_artifacts
             UNION ALL SELECT last_check FROM potree_artifacts
             UNION ALL SELECT last_check FROM nexus_artifacts",
        )
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap()
}

#[test]
fn derived_removed_first_then_raw() {
    let f = Fixture::new();
    let p1 = f.raw_point_cloud(P1, 50, Some(32633));
    let p2 = f.osg_leaf(P2);

    let run1 = f.sync();
    assert_eq!(run1.stage(Stage::Raw).inserted, 1);
    assert_eq!(run1.stage(Stage::Osg).inserted, 1);
    assert!(items::get_item(&f.conn, 7).unwrap().is_some());
    let raw = raw::get_by_path(&f.conn, &p1.to_string_lossy()).unwrap().unwrap();
    assert_eq!(raw.item_id, 7);
    assert_eq!(raw.metadata.srid(), Some(32633));
    assert_eq!(raw.last_check, run1.epoch);
    assert_eq!(dependents::count_dependents(&f.conn, raw.id).unwrap(), 1);

    fs::remove_dir_all(&p2).unwrap();
    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Osg).deleted, 1);
    assert_eq!(run2.stage(Stage::Raw).refreshed, 1);
    assert_eq!(run2.totals().inserted, 0);
    assert_eq!(run2.stage(Stage::Raw).deleted, 0);
    assert_eq!(artifacts::count(&f.conn, Stage::Raw).unwrap(), 1);

    fs::remove_dir_all(&p1).unwrap();
    let run3 = f.sync();
    assert_eq!(run3.stage(Stage::Raw).deleted, 1);
    assert_eq!(artifacts::count(&f.conn, Stage::Raw).unwrap(), 0);
    assert_eq!(artifacts::count(&f.conn, Stage::Osg).unwrap(), 0);
}

#[test]
fn raw_and_derived_removed_together_are_both_swept() {
    let f = Fixture::new();
    let p1 = f.raw_point_cloud(P1, 50, None);
    let p2 = f.osg_leaf(P2);
    f.sync();

    fs::remove_dir_all(&p2).unwrap();
    fs::remove_dir_all(&p1).unwrap();
    let run2 = f.sync();

    assert_eq!(run2.stage(Stage::Osg).deleted, 1);
    assert_eq!(run2.stage(Stage::Raw).deleted, 1);
    assert_eq!(run2.stage(Stage::Raw).retained, 0);
    for stage in Stage::ALL {
        assert_eq!(artifacts::count(&f.conn, stage).unwrap(), 0, "{stage}");
    }
}

#[test]
fn second_run_without_changes_only_refreshes() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    f.osg_leaf(P2);
    f.raw_point_cloud("RAW/PC/BACK/tiles", 500, None);
    fs::write(
        f.dir("RAW/MESH/SITE/CURR/S7/model_SRID_32633").join("m.obj"),
        b"v 0 0 0",
    )
    .unwrap();

    let first = f.sync();
    assert_eq!(first.totals().inserted, 4);

    let second = f.sync();
    let totals = second.totals();
    assert_eq!(totals.inserted, 0);
    assert_eq!(totals.deleted, 0);
    assert_eq!(totals.violations, 0);
    assert_eq!(totals.errors, 0);
    assert_eq!(totals.orphan_warnings, 0);
    assert_eq!(totals.refreshed, 4);
    assert!(second.epoch > first.epoch);
}

#[test]
fn raw_with_remaining_dependents_is_retained() {
    let f = Fixture::new();
    let p1 = f.raw_point_cloud(P1, 50, None);
    f.osg_leaf(P2);
    f.sync();

    fs::remove_dir_all(&p1).unwrap();
    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Raw).retained, 1);
    assert_eq!(run2.stage(Stage::Raw).deleted, 0);
    assert_eq!(run2.stage(Stage::Osg).refreshed, 1);
    assert_eq!(run2.stage(Stage::Osg).orphan_warnings, 1);

    let raw = raw::get_by_path(&f.conn, &p1.to_string_lossy()).unwrap();
    assert!(raw.is_some(), "raw record must outlive its dependents");
}

#[test]
fn no_last_check_exceeds_the_epoch() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    f.osg_leaf(P2);
    f.dir("POTREE/PC/SITE/S7/scan1/scan1_levels_4");

    let first = f.sync();
    let checks = all_last_checks(&f);
    assert_eq!(checks.len(), 3);
    assert!(checks.iter().all(|&c| c == first.epoch));

    let second = f.sync();
    assert!(all_last_checks(&f).iter().all(|&c| c <= second.epoch));
}

#[test]
fn present_but_unvisited_record_is_a_violation() {
    let f = Fixture::new();
    let stray = f.raw_point_cloud("elsewhere/scan", 5, None);
    raw::insert(
        &f.conn,
        &raw::NewRawArtifact {
            item_id: 7,
            abs_path: stray.to_string_lossy().into_owned(),
            last_mod: 0,
            last_check: 0,
            metadata: raw::RawMetadata::PointCloud(Default::default()),
        },
    )
    .unwrap();

    let summary = f.sync();
    assert_eq!(summary.stage(Stage::Raw).violations, 1);
    assert_eq!(artifacts::count(&f.conn, Stage::Raw).unwrap(), 1);
}

#[cfg(unix)]
#[test]
fn unresolvable_path_is_not_treated_as_absent() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    f.osg_leaf(P2);
    f.sync();

    // OSG/PC becomes a link to itself: every lookup below it fails with ELOOP
    let kind = f.root.join("OSG/PC");
    fs::remove_dir_all(&kind).unwrap();
    std::os::unix::fs::symlink("PC", &kind).unwrap();

    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Osg).deleted, 0);
    assert_eq!(run2.stage(Stage::Osg).errors, 1);
    assert_eq!(artifacts::count(&f.conn, Stage::Osg).unwrap(), 1);
    assert_eq!(run2.stage(Stage::Raw).refreshed, 1);
}

#[test]
fn side_car_left_behind_is_not_catalogued() {
    let f = Fixture::new();
    let folder = f.dir("RAW/PICT/SITE/CURR/S7");
    let picture = folder.join("a.jpg");
    fs::write(&picture, b"jpeg").unwrap();
    fs::write(folder.join("a.jpg.json"), r#"{"srid": 32633}"#).unwrap();

    let run1 = f.sync();
    assert_eq!(run1.stage(Stage::Raw).inserted, 1);

    fs::remove_file(&picture).unwrap();
    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Raw).inserted, 0);
    assert_eq!(run2.stage(Stage::Raw).deleted, 1);
    assert_eq!(artifacts::count(&f.conn, Stage::Raw).unwrap(), 0);
}

#[test]
fn changed_content_warns_without_adopting_the_new_timestamp() {
    let f = Fixture::new();
    let p1 = f.raw_point_cloud(P1, 50, None);
    f.sync();
    let before = raw::get_by_path(&f.conn, &p1.to_string_lossy()).unwrap().unwrap();

    set_mtime(&p1.join("tile.las"), hours_from_now(2));
    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Raw).stale_warnings, 1);
    assert_eq!(run2.stage(Stage::Raw).refreshed, 1);

    let after = raw::get_by_path(&f.conn, &p1.to_string_lossy()).unwrap().unwrap();
    assert_eq!(after.last_mod, before.last_mod);
    assert_eq!(after.last_check, run2.epoch);
}

#[test]
fn derived_leaf_without_raw_record_is_skipped() {
    let f = Fixture::new();
    f.osg_leaf(P2);
    let summary = f.sync();
    assert_eq!(summary.stage(Stage::Osg).errors, 1);
    assert_eq!(artifacts::count(&f.conn, Stage::Osg).unwrap(), 0);
}

#[test]
fn bad_leaves_are_isolated() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    // not a LAS file
    fs::write(f.dir("RAW/PC/SITE/S8/broken").join("x.las"), b"nope").unwrap();
    // site folder without the S prefix
    f.raw_point_cloud("RAW/PC/SITE/site9/scan", 1, None);
    // empty leaf
    f.dir("RAW/PC/SITE/S10/empty");

    let summary = f.sync();
    let raw_counts = summary.stage(Stage::Raw);
    assert_eq!(raw_counts.inserted, 1);
    assert_eq!(raw_counts.errors, 2);
    assert_eq!(raw_counts.skipped, 1);
    assert!(items::get_item(&f.conn, 8).unwrap().is_none());
}

#[test]
fn potree_conversions_are_recorded_individually() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    let leaf = f.dir("POTREE/PC/SITE/S7/scan1");
    fs::create_dir(leaf.join("scan1_levels_6")).unwrap();
    fs::create_dir(leaf.join("scan1_levels_8")).unwrap();

    let summary = f.sync();
    assert_eq!(summary.stage(Stage::Potree).inserted, 2);

    let raw = raw::get_by_path(&f.conn, &f.root.join(P1).to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(dependents::count_dependents(&f.conn, raw.id).unwrap(), 2);
    let converted = artifacts::find_by_path(
        &f.conn,
        Stage::Potree,
        &leaf.join("scan1_levels_8").to_string_lossy(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(derived::potree_levels(&f.conn, converted.id).unwrap(), Some(8));

    fs::remove_dir_all(leaf.join("scan1_levels_6")).unwrap();
    let run2 = f.sync();
    assert_eq!(run2.stage(Stage::Potree).deleted, 1);
    assert_eq!(dependents::count_dependents(&f.conn, raw.id).unwrap(), 1);
}

#[test]
fn unselected_types_are_neither_scanned_nor_swept() {
    let f = Fixture::new();
    let p1 = f.raw_point_cloud(P1, 50, None);
    f.sync();
    fs::remove_dir_all(&p1).unwrap();

    let meshes_only = SyncOptions {
        artifact_types: vec![ArtifactType::Mesh],
        ..SyncOptions::default()
    };
    let summary = f.sync_with(meshes_only);
    assert_eq!(summary.totals().deleted, 0);
    assert_eq!(artifacts::count(&f.conn, Stage::Raw).unwrap(), 1);

    let summary = f.sync();
    assert_eq!(summary.stage(Stage::Raw).deleted, 1);
}

#[test]
fn unselected_stages_are_left_alone() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    let p2 = f.osg_leaf(P2);
    f.sync();
    fs::remove_dir_all(&p2).unwrap();

    let raw_only = SyncOptions {
        stages: vec![Stage::Raw],
        ..SyncOptions::default()
    };
    let summary = f.sync_with(raw_only);
    assert!(!summary.stages.contains_key(&Stage::Osg));
    assert_eq!(artifacts::count(&f.conn, Stage::Osg).unwrap(), 1);
}

#[test]
fn osg_run_touches_the_stamp_file() {
    let f = Fixture::new();
    f.raw_point_cloud(P1, 50, None);
    f.osg_leaf(P2);
    f.sync();
    assert!(f.root.join("OSG/LAST_MOD").is_file());

    let g = Fixture::new();
    g.dir("OSG");
    g.sync_with(SyncOptions {
        stamp_file: None,
        ..SyncOptions::default()
    });
    assert!(!g.root.join("OSG/LAST_MOD").exists());
}

#[test]
fn osg_background_point_cloud_offsets_place_site_models() {
    let f = Fixture::new();
    f.raw_point_cloud("RAW/PC/BACK/tiles", 500, Some(32633));
    let back = f.dir("OSG/PC/BACK/tiles");
    fs::write(back.join("tiles.osgb"), b"osgb").unwrap();
    fs::write(back.join("offset.txt"), "offsets: 100 200 5\n").unwrap();

    f.raw_point_cloud(P1, 50, Some(32633));
    let site = f.osg_leaf(P2);
    fs::write(site.join("offset.txt"), "offsets: 1 2 3\n").unwrap();

    let summary = f.sync();
    assert_eq!(summary.stage(Stage::Osg).inserted, 2);
    assert_eq!(summary.stage(Stage::Osg).errors, 0);

    let stamp = artifacts::find_by_path(&f.conn, Stage::Osg, &site.to_string_lossy())
        .unwrap()
        .unwrap();
    let osg = derived::get_osg(&f.conn, stamp.id).unwrap().unwrap();
    let location = osg.location.unwrap();
    assert_eq!(location.srid, Some(32633));
    assert_eq!((location.x, location.y, location.z), (101.0, 202.0, 8.0));
}
