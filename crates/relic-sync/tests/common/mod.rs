#![allow(dead_code)]

use relic_state::{db, schema};
use relic_sync::engine::{SyncEngine, SyncOptions, SyncSummary};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub conn: Connection,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        fs::create_dir(&root).unwrap();
        let conn = db::open_connection(&dir.path().join("catalog.db")).unwrap();
        schema::create_tables(&conn).unwrap();
        Self {
            _dir: dir,
            root,
            conn,
        }
    }

    pub fn sync(&self) -> SyncSummary {
        self.sync_with(SyncOptions::default())
    }

    pub fn sync_with(&self, options: SyncOptions) -> SyncSummary {
        SyncEngine::new(&self.conn, &self.root, options).run().unwrap()
    }

    /// `<root>/<rel>`, created as a directory.
    pub fn dir(&self, rel: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Raw point cloud folder with one LAS tile.
    pub fn raw_point_cloud(&self, rel: &str, points: u32, epsg: Option<u16>) -> PathBuf {
        let leaf = self.dir(rel);
        fs::write(leaf.join("tile.las"), las_bytes(points, 0.0, 10.0, epsg)).unwrap();
        leaf
    }

    /// OSG leaf with a model and its XML description.
    pub fn osg_leaf(&self, rel: &str) -> PathBuf {
        let leaf = self.dir(rel);
        fs::write(leaf.join("model.osgb"), b"osgb").unwrap();
        fs::write(leaf.join("model.xml"), b"<xml/>").unwrap();
        leaf
    }
}

/// Minimal LAS 1.2 header, optionally with a GeoKeyDirectory holding `epsg`.
pub fn las_bytes(points: u32, min: f64, max: f64, epsg: Option<u16>) -> Vec<u8> {
    const HEADER: usize = 227;
    let mut vlr = Vec::new();
    if let Some(code) = epsg {
        let keys: [u16; 8] = [1, 1, 0, 1, 3072, 0, 1, code];
        let payload: Vec<u8> = keys.iter().flat_map(|k| k.to_le_bytes()).collect();
        vlr.extend_from_slice(&[0u8; 18]);
        vlr.extend_from_slice(&34735u16.to_le_bytes());
        vlr.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        vlr.extend_from_slice(&[0u8; 32]);
        vlr.extend_from_slice(&payload);
    }

    let mut h = vec![0u8; HEADER];
    h[0..4].copy_from_slice(b"LASF");
    h[24] = 1;
    h[25] = 2;
    h[94..96].copy_from_slice(&(HEADER as u16).to_le_bytes());
    h[96..100].copy_from_slice(&((HEADER + vlr.len()) as u32).to_le_bytes());
    h[100..104].copy_from_slice(&u32::from(epsg.is_some()).to_le_bytes());
    h[107..111].copy_from_slice(&points.to_le_bytes());
    for (at, v) in [(179, max), (187, min), (195, max), (203, min), (211, max), (219, min)] {
        h[at..at + 8].copy_from_slice(&f64::to_le_bytes(v));
    }
    h.extend_from_slice(&vlr);
    h
}

pub fn set_mtime(path: &Path, at: SystemTime) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .or_else(|_| fs::File::open(path))
        .unwrap();
    file.set_modified(at).unwrap();
}

pub fn hours_from_now(hours: u64) -> SystemTime {
    SystemTime::now() + Duration::from_secs(hours * 3600)
}
