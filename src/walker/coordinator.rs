//! Scan coordinator - orchestrates the parallel extent scan
//!
//! The coordinator is responsible for:
//! - Seeding the target queue with the input paths
//! - Building the run-wide dedup tracker and stats accumulator
//! - Spawning and joining the worker pool
//! - Turning worker results into a report or a fatal error

use crate::config::ScanConfig;
use crate::dedup::DedupTracker;
use crate::error::{CompsizeError, Result, TargetError, WorkerError};
use crate::source::{ExtentSource, FsSource};
use crate::stats::GlobalStats;
use crate::walker::queue::{TargetQueue, TargetTask};
use crate::walker::worker::{worker_loop, WorkerContext};
use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Result of a finished scan
#[derive(Debug)]
pub struct ScanReport {
    /// Final merged statistics
    pub stats: GlobalStats,

    /// Targets that could not be scanned
    pub failures: Vec<TargetError>,

    /// Distinct physical extents seen
    pub unique_extents: usize,

    /// Time taken for the scan
    pub duration: Duration,

    /// Whether the scan ran to the end (vs was interrupted)
    pub completed: bool,

    /// Worker threads used
    pub workers: usize,
}

impl ScanReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl Serialize for ScanReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Failure<'a> {
            path: std::borrow::Cow<'a, str>,
            error: String,
        }

        let failures: Vec<Failure<'_>> = self
            .failures
            .iter()
            .map(|f| Failure {
                path: f.path().to_string_lossy(),
                error: f.to_string(),
            })
            .collect();

        let mut state = serializer.serialize_struct("ScanReport", 6)?;
        state.serialize_field("stats", &self.stats)?;
        state.serialize_field("failures", &failures)?;
        state.serialize_field("unique_extents", &self.unique_extents)?;
        state.serialize_field("duration_secs", &self.duration.as_secs_f64())?;
        state.serialize_field("completed", &self.completed)?;
        state.serialize_field("workers", &self.workers)?;
        state.end()
    }
}

/// Live counters for progress display
#[derive(Debug)]
pub struct ScanProgress {
    files: AtomicU64,
    directories: AtomicU64,
    extents: AtomicU64,
    failures: AtomicU64,
    started: Instant,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            files: AtomicU64::new(0),
            directories: AtomicU64::new(0),
            extents: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_file(&self, extents: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.extents.fetch_add(extents, Ordering::Relaxed);
    }

    pub(crate) fn record_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files: self.files.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            extents: self.extents.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time progress values
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub files: u64,
    pub directories: u64,
    pub extents: u64,
    pub failures: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Calculate files per second rate
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs one scan over a set of targets
pub struct Scheduler<S: ExtentSource> {
    config: ScanConfig,
    source: S,
    shutdown: Arc<AtomicBool>,
    progress: Arc<ScanProgress>,
}

impl Scheduler<FsSource> {
    /// Scheduler reading the mounted filesystem
    pub fn for_filesystem(config: ScanConfig) -> Self {
        Self::new(config, FsSource)
    }
}

impl<S: ExtentSource> Scheduler<S> {
    pub fn new(config: ScanConfig, source: S) -> Self {
        Self {
            config,
            source,
            shutdown: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ScanProgress::new()),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Live progress counters
    pub fn progress(&self) -> Arc<ScanProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the scan to completion, interruption, or a fatal error
    pub fn run(self) -> Result<ScanReport> {
        let start = Instant::now();
        let worker_count = self.config.worker_count.max(1);

        info!(
            paths = self.config.paths.len(),
            workers = worker_count,
            "Starting extent scan"
        );

        let queue = TargetQueue::new();
        for path in &self.config.paths {
            queue.push(TargetTask::top_level(path.clone()));
        }

        let dedup = DedupTracker::new();
        let global = Mutex::new(GlobalStats::new());
        let failures = Mutex::new(Vec::new());
        let fatal = Mutex::new(None);
        let abort = AtomicBool::new(false);

        let ctx = WorkerContext {
            config: &self.config,
            source: &self.source,
            queue: &queue,
            dedup: &dedup,
            global: &global,
            failures: &failures,
            fatal: &fatal,
            abort: &abort,
            shutdown: &self.shutdown,
            progress: &self.progress,
        };

        let mut spawn_error = None;
        let joined: Vec<std::result::Result<(), WorkerError>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(worker_count);
            for id in 0..worker_count {
                let ctx = &ctx;
                let spawned = thread::Builder::new()
                    .name(format!("compsize-{}", id))
                    .spawn_scoped(s, move || worker_loop(id, ctx));
                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(e) => {
                        // Stop the workers already running; the run is void
                        abort.store(true, Ordering::SeqCst);
                        spawn_error = Some(WorkerError::SpawnFailed {
                            id,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }

            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().map_err(|payload| WorkerError::Panicked {
                        id,
                        message: panic_message(payload.as_ref()),
                    })
                })
                .collect()
        });

        if let Some(err) = spawn_error {
            return Err(err.into());
        }
        for result in joined {
            result?;
        }
        if let Some(err) = fatal.into_inner() {
            error!(error = %err, "Scan aborted");
            return Err(CompsizeError::Transport(err));
        }

        let completed = !self.shutdown.load(Ordering::SeqCst);
        let stats = global.into_inner();
        let mut failures = failures.into_inner();
        failures.sort_by(|a, b| a.path().cmp(b.path()));
        let duration = start.elapsed();

        info!(
            files = stats.counters.files,
            directories = stats.counters.directories,
            extents = dedup.len(),
            failures = failures.len(),
            completed,
            duration_ms = duration.as_millis() as u64,
            "Scan finished"
        );

        Ok(ScanReport {
            stats,
            failures,
            unique_extents: dedup.len(),
            duration,
            completed,
            workers: worker_count,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Worker thread panicked".into()
    }
}
