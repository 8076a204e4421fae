//! One reconciliation run: scan every selected stage least-derived first,
//! then sweep the same stages most-derived first.

use crate::classify::PathClassifier;
use crate::extract;
use crate::staleness::last_modified;
use relic_core::config::SyncConfig;
use relic_core::constants::DEFAULT_STAMP_FILE;
use relic_core::error::{ClassificationError, ExtractError, StateError, SyncError};
use relic_core::time::now_ns;
use relic_core::types::{ArtifactLocation, ArtifactType, ItemKind, Period, Stage};
use relic_state::artifacts::{self, StaleRecord};
use relic_state::derived::{self, NewOsgArtifact, OsgLocation};
use relic_state::raw::{self, NewRawArtifact, RawArtifact};
use relic_state::{dependents, items};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Stages to reconcile. Order is irrelevant: runs always follow `Stage::ALL`.
    pub stages: Vec<Stage>,
    pub artifact_types: Vec<ArtifactType>,
    /// File touched in the OSG stage root after a run that included OSG.
    pub stamp_file: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stages: Stage::ALL.to_vec(),
            artifact_types: ArtifactType::ALL.to_vec(),
            stamp_file: Some(DEFAULT_STAMP_FILE.to_string()),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        let stamp = config.stamp_file.trim();
        Self {
            stages: config.selected_stages(),
            artifact_types: config.selected_artifact_types(),
            stamp_file: (!stamp.is_empty()).then(|| stamp.to_string()),
        }
    }

    fn includes_stage(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    fn includes_type(&self, artifact_type: ArtifactType) -> bool {
        self.artifact_types.contains(&artifact_type)
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scanning(Stage),
    Sweeping(Stage),
    Done,
}

/// Why a leaf was skipped during scan. Never fatal.
#[derive(Debug, Error)]
pub enum ItemSkip {
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("no raw artifact catalogued at {raw_path}")]
    DanglingReference { raw_path: PathBuf },

    #[error("empty leaf directory {path}")]
    EmptyLeaf { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("catalog write failed: {0}")]
    Catalog(#[from] StateError),
}

/// Result of visiting one leaf (or one POTREE conversion) during scan.
#[derive(Debug)]
pub enum ItemOutcome {
    Inserted,
    Refreshed { stale: bool },
    Skipped(ItemSkip),
}

impl ItemOutcome {
    /// The leaf has a catalog record after this visit.
    pub fn is_recorded(&self) -> bool {
        matches!(self, ItemOutcome::Inserted | ItemOutcome::Refreshed { .. })
    }
}

/// Result of examining one sweep candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Deleted,
    Retained { dependents: u64 },
    Violation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub inserted: u64,
    pub refreshed: u64,
    pub stale_warnings: u64,
    pub orphan_warnings: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub retained: u64,
    pub violations: u64,
    pub errors: u64,
}

impl StageCounts {
    fn record_scan(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Inserted => self.inserted += 1,
            ItemOutcome::Refreshed { stale } => {
                self.refreshed += 1;
                if *stale {
                    self.stale_warnings += 1;
                }
            }
            ItemOutcome::Skipped(ItemSkip::EmptyLeaf { .. }) => self.skipped += 1,
            ItemOutcome::Skipped(_) => self.errors += 1,
        }
    }

    fn record_sweep(&mut self, outcome: &SweepOutcome) {
        match outcome {
            SweepOutcome::Deleted => self.deleted += 1,
            SweepOutcome::Retained { .. } => self.retained += 1,
            SweepOutcome::Violation => self.violations += 1,
        }
    }

    fn add(&mut self, other: &StageCounts) {
        self.inserted += other.inserted;
        self.refreshed += other.refreshed;
        self.stale_warnings += other.stale_warnings;
        self.orphan_warnings += other.orphan_warnings;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.retained += other.retained;
        self.violations += other.violations;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub epoch: i64,
    pub stages: BTreeMap<Stage, StageCounts>,
}

impl SyncSummary {
    pub fn stage(&self, stage: Stage) -> StageCounts {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    pub fn totals(&self) -> StageCounts {
        let mut total = StageCounts::default();
        for counts in self.stages.values() {
            total.add(counts);
        }
        total
    }
}

/// Run epoch: strictly greater than every `last_check` already stored.
pub fn capture_epoch(conn: &Connection) -> Result<i64, StateError> {
    let now = now_ns();
    Ok(match artifacts::max_last_check(conn)? {
        Some(max) if max >= now => max + 1,
        _ => now,
    })
}

pub struct SyncEngine<'a> {
    conn: &'a Connection,
    classifier: PathClassifier,
    options: SyncOptions,
    state: RunState,
}

impl<'a> SyncEngine<'a> {
    pub fn new(conn: &'a Connection, data_root: impl Into<PathBuf>, options: SyncOptions) -> Self {
        Self {
            conn,
            classifier: PathClassifier::new(data_root),
            options,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn data_root(&self) -> &Path {
        self.classifier.data_root()
    }

    fn set_state(&mut self, state: RunState) {
        debug!(from = ?self.state, to = ?state, "Sync state transition");
        self.state = state;
    }

    /// Scan then sweep every selected stage. Only an unusable catalog or an
    /// unreadable data root abort the run; everything else is counted.
    pub fn run(&mut self) -> Result<SyncSummary, SyncError> {
        let root = self.data_root().to_path_buf();
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::UnreadableRoot {
                    path: root,
                    reason: "not a directory".to_string(),
                });
            }
            Err(e) => {
                return Err(SyncError::UnreadableRoot {
                    path: root,
                    reason: e.to_string(),
                });
            }
        }
        if let Err(e) = fs::read_dir(&root) {
            return Err(SyncError::UnreadableRoot {
                path: root,
                reason: e.to_string(),
            });
        }

        let epoch = capture_epoch(self.conn)?;
        let stages: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| self.options.includes_stage(*s))
            .collect();
        info!(
            data_root = %root.display(),
            epoch,
            stages = ?stages,
            artifact_types = ?self.options.artifact_types,
            "Starting catalog sync"
        );

        let mut summary = SyncSummary {
            epoch,
            stages: BTreeMap::new(),
        };

        for &stage in &stages {
            self.set_state(RunState::Scanning(stage));
            let started = Instant::now();
            let counts = summary.stages.entry(stage).or_default();
            self.scan_stage(stage, epoch, counts);
            info!(
                stage = %stage,
                inserted = counts.inserted,
                refreshed = counts.refreshed,
                stale = counts.stale_warnings,
                orphaned = counts.orphan_warnings,
                errors = counts.errors,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scan finished"
            );
        }

        for &stage in stages.iter().rev() {
            self.set_state(RunState::Sweeping(stage));
            let started = Instant::now();
            let counts = summary.stages.entry(stage).or_default();
            self.sweep_stage(stage, epoch, counts)?;
            info!(
                stage = %stage,
                deleted = counts.deleted,
                retained = counts.retained,
                violations = counts.violations,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sweep finished"
            );
        }

        if stages.contains(&Stage::Osg) {
            self.touch_stamp();
        }

        self.set_state(RunState::Done);
        let totals = summary.totals();
        info!(
            inserted = totals.inserted,
            refreshed = totals.refreshed,
            stale = totals.stale_warnings,
            orphaned = totals.orphan_warnings,
            skipped = totals.skipped,
            deleted = totals.deleted,
            retained = totals.retained,
            violations = totals.violations,
            errors = totals.errors,
            "Catalog sync complete"
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Scan one stage. Per-leaf failures are logged and counted.
    pub fn scan_stage(&self, stage: Stage, epoch: i64, counts: &mut StageCounts) {
        for artifact_type in ArtifactType::ALL {
            if !self.options.includes_type(artifact_type) || !stage.supports(artifact_type) {
                continue;
            }
            for leaf in self.leaf_paths(stage, artifact_type) {
                match stage {
                    Stage::Potree => {
                        let outcomes = self.scan_potree_leaf(&leaf, epoch);
                        for outcome in &outcomes {
                            log_outcome(stage, &leaf, outcome);
                            counts.record_scan(outcome);
                        }
                        let recorded = outcomes.iter().filter(|o| o.is_recorded()).count() as u64;
                        if recorded > 0 && self.raw_missing(stage, &leaf) {
                            counts.orphan_warnings += recorded;
                        }
                    }
                    _ => {
                        let outcome = self.scan_leaf(stage, &leaf, epoch);
                        log_outcome(stage, &leaf, &outcome);
                        counts.record_scan(&outcome);
                        if stage.is_derived() && outcome.is_recorded() && self.raw_missing(stage, &leaf) {
                            counts.orphan_warnings += 1;
                        }
                    }
                }
            }
        }
    }

    /// Candidate leaves of one stage/type, in a stable order.
    fn leaf_paths(&self, stage: Stage, artifact_type: ArtifactType) -> Vec<PathBuf> {
        let periods: Vec<Option<Period>> = if artifact_type.periods().is_empty() {
            vec![None]
        } else {
            artifact_type.periods().iter().copied().map(Some).collect()
        };

        let mut leaves = Vec::new();
        for kind in ItemKind::ALL {
            for period in &periods {
                let mut base = self
                    .data_root()
                    .join(stage.marker())
                    .join(artifact_type.marker())
                    .join(kind.marker());
                if let Some(period) = period {
                    base.push(period.marker());
                }

                let entries = match sorted_entries(&base) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(path = %base.display(), error = %e, "Skipping missing folder");
                        continue;
                    }
                };
                match kind {
                    ItemKind::Background => leaves.extend(entries),
                    ItemKind::Site => {
                        for site in entries {
                            if !site.is_dir() {
                                // classification reports it
                                leaves.push(site);
                                continue;
                            }
                            match sorted_entries(&site) {
                                Ok(children) => leaves.extend(children),
                                Err(e) => {
                                    warn!(path = %site.display(), error = %e, "Skipping unreadable site folder");
                                }
                            }
                        }
                    }
                }
            }
        }

        if stage == Stage::Raw && artifact_type == ArtifactType::Picture {
            leaves.retain(|p| !extract::is_sidecar(p));
        }
        leaves
    }

    fn scan_leaf(&self, stage: Stage, path: &Path, epoch: i64) -> ItemOutcome {
        match self.try_scan_leaf(stage, path, epoch) {
            Ok(outcome) => outcome,
            Err(skip) => ItemOutcome::Skipped(skip),
        }
    }

    fn try_scan_leaf(&self, stage: Stage, path: &Path, epoch: i64) -> Result<ItemOutcome, ItemSkip> {
        let loc = self.classifier.classify(path)?;
        let mtime = last_modified(path).map_err(|source| ItemSkip::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let abs_path = path.to_string_lossy();

        if let Some(stamp) = artifacts::find_by_path(self.conn, stage, &abs_path)? {
            return self.refresh(stage, path, stamp, mtime, epoch);
        }

        match stage {
            Stage::Raw => self.insert_raw(path, &loc, mtime, epoch),
            Stage::Osg => {
                let raw = self.resolve_raw(&loc)?;
                self.insert_osg(path, &loc, &raw, mtime, epoch)
            }
            Stage::Nexus => {
                let raw = self.resolve_raw(&loc)?;
                derived::insert_nexus(self.conn, raw.id, &abs_path, mtime, epoch)?;
                Ok(ItemOutcome::Inserted)
            }
            // conversions are scanned one by one in scan_potree_leaf
            Stage::Potree => Err(ItemSkip::Classification(ClassificationError::Contradictory {
                path: path.to_path_buf(),
                reason: "POTREE leaves hold conversions, not artifacts".to_string(),
            })),
        }
    }

    /// A POTREE leaf mirrors the raw leaf; each of its children is one conversion.
    fn scan_potree_leaf(&self, leaf: &Path, epoch: i64) -> Vec<ItemOutcome> {
        let loc = match self.classifier.classify(leaf) {
            Ok(loc) => loc,
            Err(e) => return vec![ItemOutcome::Skipped(e.into())],
        };
        let conversions = match sorted_entries(leaf) {
            Ok(children) => children,
            Err(source) => {
                return vec![ItemOutcome::Skipped(ItemSkip::Unreadable {
                    path: leaf.to_path_buf(),
                    source,
                })];
            }
        };

        let mut raw: Option<RawArtifact> = None;
        conversions
            .iter()
            .map(|conversion| {
                match self.scan_conversion(&loc, conversion, epoch, &mut raw) {
                    Ok(outcome) => outcome,
                    Err(skip) => ItemOutcome::Skipped(skip),
                }
            })
            .collect()
    }

    fn scan_conversion(
        &self,
        loc: &ArtifactLocation,
        conversion: &Path,
        epoch: i64,
        raw: &mut Option<RawArtifact>,
    ) -> Result<ItemOutcome, ItemSkip> {
        let mtime = last_modified(conversion).map_err(|source| ItemSkip::Unreadable {
            path: conversion.to_path_buf(),
            source,
        })?;
        let abs_path = conversion.to_string_lossy();
        if let Some(stamp) = artifacts::find_by_path(self.conn, Stage::Potree, &abs_path)? {
            return self.refresh(Stage::Potree, conversion, stamp, mtime, epoch);
        }

        // resolved once per leaf
        let raw_id = match raw.as_ref().map(|r| r.id) {
            Some(id) => id,
            None => raw.insert(self.resolve_raw(loc)?).id,
        };
        let name = conversion
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let potree_id = derived::insert_potree(
            self.conn,
            raw_id,
            &abs_path,
            mtime,
            epoch,
            extract::potree_levels(&name),
        )?;
        debug!(potree_id, raw_id, path = %conversion.display(), "Inserted POTREE conversion");
        Ok(ItemOutcome::Inserted)
    }

    fn refresh(
        &self,
        stage: Stage,
        path: &Path,
        stamp: artifacts::Stamp,
        mtime: i64,
        epoch: i64,
    ) -> Result<ItemOutcome, ItemSkip> {
        let stale = mtime > stamp.last_mod;
        if stale {
            warn!(
                stage = %stage,
                path = %path.display(),
                stored = stamp.last_mod,
                on_disk = mtime,
                "Artifact changed outside the add/update flow; catalog may be stale"
            );
        }
        artifacts::touch(self.conn, stage, stamp.id, epoch)?;
        Ok(ItemOutcome::Refreshed { stale })
    }

    fn insert_raw(
        &self,
        path: &Path,
        loc: &ArtifactLocation,
        mtime: i64,
        epoch: i64,
    ) -> Result<ItemOutcome, ItemSkip> {
        if path.is_dir() {
            let mut entries = fs::read_dir(path).map_err(|source| ItemSkip::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
            if entries.next().is_none() {
                return Err(ItemSkip::EmptyLeaf {
                    path: path.to_path_buf(),
                });
            }
        }

        let metadata = extract::extract_raw(path, loc)?;
        let item_id = loc.item_id();
        if items::ensure_item(self.conn, item_id)? {
            info!(item_id, "Created item");
        }
        let raw_id = raw::insert(
            self.conn,
            &NewRawArtifact {
                item_id,
                abs_path: path.to_string_lossy().into_owned(),
                last_mod: mtime,
                last_check: epoch,
                metadata,
            },
        )?;
        debug!(raw_id, item_id, path = %path.display(), "Inserted raw artifact");
        Ok(ItemOutcome::Inserted)
    }

    fn insert_osg(
        &self,
        path: &Path,
        loc: &ArtifactLocation,
        raw: &RawArtifact,
        mtime: i64,
        epoch: i64,
    ) -> Result<ItemOutcome, ItemSkip> {
        let pc_background =
            loc.kind == ItemKind::Background && loc.artifact_type == ArtifactType::PointCloud;
        let leaf = extract::read_osg_leaf(path, pc_background)?;

        let location = if pc_background {
            None
        } else {
            let background_offsets = match (raw.artifact_type(), raw.metadata.srid()) {
                (ArtifactType::PointCloud | ArtifactType::Mesh, Some(srid)) => {
                    derived::background_offsets(self.conn, srid)?
                }
                _ => None,
            };
            let item = items::get_item(self.conn, raw.item_id)?;
            match extract::osg_location(&raw.metadata, leaf.offsets, background_offsets, item.as_ref()) {
                Some(location) => Some(location),
                None => {
                    warn!(
                        path = %path.display(),
                        raw_id = raw.id,
                        "OSG position could not be computed; placing at origin"
                    );
                    Some(OsgLocation {
                        srid: None,
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                    })
                }
            }
        };

        let osg_id = derived::insert_osg(
            self.conn,
            &NewOsgArtifact {
                raw_artifact_id: raw.id,
                abs_path: path.to_string_lossy().into_owned(),
                last_mod: mtime,
                last_check: epoch,
                xml_path: leaf.xml_path,
                offsets: leaf.offsets,
                location,
            },
        )?;
        debug!(osg_id, raw_id = raw.id, path = %path.display(), "Inserted OSG artifact");
        Ok(ItemOutcome::Inserted)
    }

    /// The raw artifact a derived leaf was produced from: same relative path under RAW.
    fn resolve_raw(&self, loc: &ArtifactLocation) -> Result<RawArtifact, ItemSkip> {
        let raw_path = loc.in_stage(Stage::Raw).to_path(self.data_root());
        raw::get_by_path(self.conn, &raw_path.to_string_lossy())?
            .ok_or(ItemSkip::DanglingReference { raw_path })
    }

    /// Warns when a catalogued derived leaf outlives its raw artifact on disk.
    fn raw_missing(&self, stage: Stage, leaf: &Path) -> bool {
        let Ok(loc) = self.classifier.classify(leaf) else {
            return false;
        };
        let raw_path = loc.in_stage(Stage::Raw).to_path(self.data_root());
        match fs::symlink_metadata(&raw_path) {
            Ok(_) => false,
            Err(e) => {
                warn!(
                    stage = %stage,
                    path = %leaf.display(),
                    raw_path = %raw_path.display(),
                    error = %e,
                    "Raw artifact is gone from disk while its derived artifact remains"
                );
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    /// Sweep one stage. Selecting the candidates must succeed; individual
    /// deletions are isolated.
    pub fn sweep_stage(
        &self,
        stage: Stage,
        epoch: i64,
        counts: &mut StageCounts,
    ) -> Result<(), SyncError> {
        let candidates = artifacts::select_stale(self.conn, stage, epoch)?;
        for candidate in candidates {
            if let Some(t) = candidate.artifact_type
                && !self.options.includes_type(t)
            {
                continue;
            }
            match self.sweep_candidate(stage, &candidate) {
                Ok(outcome) => counts.record_sweep(&outcome),
                Err(e) => {
                    error!(
                        stage = %stage,
                        path = %candidate.abs_path,
                        error = %e,
                        "Failed to sweep record"
                    );
                    counts.errors += 1;
                }
            }
        }
        Ok(())
    }

    fn sweep_candidate(
        &self,
        stage: Stage,
        candidate: &StaleRecord,
    ) -> Result<SweepOutcome, StateError> {
        match fs::symlink_metadata(&candidate.abs_path) {
            Ok(_) => {
                error!(
                    stage = %stage,
                    path = %candidate.abs_path,
                    "Record was not visited by this run but its path still exists; refusing to delete"
                );
                return Ok(SweepOutcome::Violation);
            }
            Err(e) if is_absent(&e) => {}
            // existence unknown
            Err(e) => return Err(StateError::Io(e)),
        }

        if stage.is_derived() {
            artifacts::delete(self.conn, stage, candidate.id)?;
            debug!(
                stage = %stage,
                path = %candidate.abs_path,
                raw_id = ?candidate.raw_artifact_id,
                "Deleted derived record"
            );
            return Ok(SweepOutcome::Deleted);
        }

        let dependents = dependents::count_dependents(self.conn, candidate.id)?;
        if dependents > 0 {
            warn!(
                path = %candidate.abs_path,
                raw_id = candidate.id,
                dependents,
                "Raw artifact removed from disk but derived records still reference it; keeping"
            );
            return Ok(SweepOutcome::Retained { dependents });
        }

        artifacts::delete(self.conn, Stage::Raw, candidate.id)?;
        debug!(raw_id = candidate.id, path = %candidate.abs_path, "Deleted raw record");
        Ok(SweepOutcome::Deleted)
    }

    fn touch_stamp(&self) {
        let Some(name) = self.options.stamp_file.as_deref() else {
            return;
        };
        let stamp = self.data_root().join(Stage::Osg.marker()).join(name);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stamp)
            .and_then(|f| f.set_modified(SystemTime::now()));
        match result {
            Ok(()) => debug!(path = %stamp.display(), "Touched stamp file"),
            Err(e) => warn!(path = %stamp.display(), error = %e, "Failed to touch stamp file"),
        }
    }
}

fn log_outcome(stage: Stage, path: &Path, outcome: &ItemOutcome) {
    match outcome {
        ItemOutcome::Inserted | ItemOutcome::Refreshed { .. } => {}
        ItemOutcome::Skipped(skip @ ItemSkip::EmptyLeaf { .. }) => {
            warn!(stage = %stage, path = %path.display(), "Skipping: {skip}");
        }
        ItemOutcome::Skipped(skip) => {
            error!(stage = %stage, path = %path.display(), "Skipping: {skip}");
        }
    }
}

/// Lookup errors that prove the path does not exist.
fn is_absent(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}
