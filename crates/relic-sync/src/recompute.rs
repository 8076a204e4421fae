//! Bulk recomputation of item vertical extents on a fixed pool of OS threads.
//!
//! The job queue is seeded with every item id followed by one `Stop` per
//! worker before any worker starts, so termination never depends on the
//! queue being closed. The driver collects exactly one result per item.

use crate::cutout::{CutoutExtractor, CutoutResult};
use crossbeam_channel::{Receiver, Sender};
use relic_core::error::StateError;
use relic_state::items;
use rusqlite::Connection;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// Opens one catalog connection per worker.
pub type ConnectionFactory = dyn Fn() -> Result<Connection, StateError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Item(i64),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    Updated { min_z: f64, max_z: f64, points: u64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub item_id: i64,
    pub worker: usize,
    #[serde(flatten)]
    pub outcome: RecomputeOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecomputeReport {
    /// One entry per requested item, sorted by item id.
    pub items: Vec<ItemReport>,
    pub workers: usize,
    pub elapsed_ms: u64,
}

impl RecomputeReport {
    pub fn updated(&self) -> usize {
        self.items
            .iter()
            .filter(|r| matches!(r.outcome, RecomputeOutcome::Updated { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.updated()
    }
}

pub struct RecomputePool {
    workers: usize,
    extractor: Arc<dyn CutoutExtractor>,
    connect: Arc<ConnectionFactory>,
}

impl RecomputePool {
    pub fn new<F>(workers: usize, extractor: Arc<dyn CutoutExtractor>, connect: F) -> Self
    where
        F: Fn() -> Result<Connection, StateError> + Send + Sync + 'static,
    {
        Self {
            workers: workers.max(1),
            extractor,
            connect: Arc::new(connect),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Recompute every item in `item_ids`. Individual failures end up in the
    /// report; only failing to start a worker thread is an error.
    pub fn run(&self, item_ids: &[i64]) -> io::Result<RecomputeReport> {
        let started = Instant::now();
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(item_ids.len() + self.workers);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<ItemReport>();

        for &item_id in item_ids {
            job_tx.send(Job::Item(item_id)).map_err(io::Error::other)?;
        }
        for _ in 0..self.workers {
            job_tx.send(Job::Stop).map_err(io::Error::other)?;
        }
        drop(job_tx);

        info!(
            items = item_ids.len(),
            workers = self.workers,
            "Starting bulk recompute"
        );

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let extractor = Arc::clone(&self.extractor);
            let connect = Arc::clone(&self.connect);
            let handle = thread::Builder::new()
                .name(format!("recompute-worker-{worker}"))
                .spawn(move || worker_loop(worker, jobs, results, extractor.as_ref(), connect.as_ref()))?;
            handles.push(handle);
        }
        // workers hold the only senders from here on
        drop(result_tx);
        drop(job_rx);

        let mut reports = Vec::with_capacity(item_ids.len());
        for _ in 0..item_ids.len() {
            match result_rx.recv() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    error!(
                        received = reports.len(),
                        expected = item_ids.len(),
                        "All recompute workers exited before reporting every item"
                    );
                    break;
                }
            }
        }

        for (worker, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker, "Recompute worker panicked");
            }
        }

        reports.sort_by_key(|r| r.item_id);
        let report = RecomputeReport {
            items: reports,
            workers: self.workers,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            updated = report.updated(),
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms,
            "Bulk recompute complete"
        );
        Ok(report)
    }
}

fn worker_loop(
    worker: usize,
    jobs: Receiver<Job>,
    results: Sender<ItemReport>,
    extractor: &dyn CutoutExtractor,
    connect: &ConnectionFactory,
) {
    let conn = match connect() {
        Ok(conn) => Ok(conn),
        Err(e) => {
            error!(worker, error = %e, "Recompute worker could not open the catalog");
            Err(e.to_string())
        }
    };
    debug!(worker, "Recompute worker started");

    for job in jobs.iter() {
        let item_id = match job {
            Job::Stop => break,
            Job::Item(item_id) => item_id,
        };
        let outcome = match &conn {
            Ok(conn) => recompute_item(worker, conn, extractor, item_id),
            Err(reason) => RecomputeOutcome::Failed {
                reason: format!("catalog unavailable: {reason}"),
            },
        };
        if results.send(ItemReport { item_id, worker, outcome }).is_err() {
            break;
        }
    }

    drop(conn);
    debug!(worker, "Recompute worker stopped");
}

fn recompute_item(
    worker: usize,
    conn: &Connection,
    extractor: &dyn CutoutExtractor,
    item_id: i64,
) -> RecomputeOutcome {
    let result = extractor.extract(conn, item_id).map_err(|e| e.to_string()).and_then(
        |CutoutResult { min_z, max_z, points }| {
            items::update_extent(conn, item_id, min_z, max_z, points)
                .map(|()| (min_z, max_z, points))
                .map_err(|e| e.to_string())
        },
    );

    match result {
        Ok((min_z, max_z, points)) => {
            info!(worker, item_id, min_z, max_z, points, "Updated item extent");
            RecomputeOutcome::Updated { min_z, max_z, points }
        }
        Err(reason) => {
            error!(worker, item_id, error = %reason, "Recompute failed");
            RecomputeOutcome::Failed { reason }
        }
    }
}
