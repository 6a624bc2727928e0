//! Worker thread logic for the parallel extent scan
//!
//! Each worker:
//! - Owns one `SearchBuffer`, reused for every query of every file
//! - Pulls targets from the shared queue
//! - Expands directories, pushing their children back onto the queue
//! - Runs search → parse → dedup claim → local stats for regular files
//! - Merges its local stats into the shared accumulator once, on exit

use crate::btrfs::buffer::SearchBuffer;
use crate::btrfs::search::{ExtentSearch, SearchRecord};
use crate::config::ScanConfig;
use crate::dedup::DedupTracker;
use crate::error::{TargetError, TargetOutcome, TransportError, TransportResult};
use crate::source::{ExtentSource, TargetKind};
use crate::stats::GlobalStats;
use crate::walker::coordinator::ScanProgress;
use crate::walker::queue::{TargetQueue, TargetTask, TaskGuard};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long a worker waits for a task before rechecking the stop flags
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// State shared by every worker of one run
pub struct WorkerContext<'a, S: ExtentSource> {
    pub config: &'a ScanConfig,
    pub source: &'a S,
    pub queue: &'a TargetQueue,
    pub dedup: &'a DedupTracker,
    pub global: &'a Mutex<GlobalStats>,
    pub failures: &'a Mutex<Vec<TargetError>>,

    /// First transport error of the run
    pub fatal: &'a Mutex<Option<TransportError>>,

    /// Set when a fatal error stops the run
    pub abort: &'a AtomicBool,

    /// Set by the signal handler
    pub shutdown: &'a AtomicBool,

    pub progress: &'a ScanProgress,
}

impl<S: ExtentSource> WorkerContext<'_, S> {
    fn should_stop(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.shutdown.load(Ordering::Relaxed)
    }
}

/// Main worker loop
pub fn worker_loop<S: ExtentSource>(id: usize, ctx: &WorkerContext<'_, S>) {
    debug!(worker = id, "Worker starting");

    let mut buffer = SearchBuffer::new();
    let mut local = GlobalStats::new();

    while !ctx.should_stop() && !ctx.queue.is_complete() {
        let task = match ctx.queue.recv_timeout(POLL_INTERVAL) {
            Some(task) => task,
            None => continue,
        };

        // Mark the task in flight until its children are queued
        let _guard = TaskGuard::new(ctx.queue);

        match process_target(ctx, &task, &mut buffer, &mut local) {
            Ok(TargetOutcome::Scanned { path, extents }) => {
                trace!(worker = id, path = %path.display(), extents, "File scanned");
            }
            Ok(TargetOutcome::Expanded { path, children }) => {
                trace!(worker = id, path = %path.display(), children, "Directory expanded");
            }
            Ok(TargetOutcome::Ignored { path, reason }) => {
                debug!(worker = id, path = %path.display(), reason, "Target ignored");
            }
            Ok(TargetOutcome::Failed(err)) => {
                warn!(worker = id, error = %err, "Target failed");
                ctx.progress.record_failure();
                ctx.failures.lock().push(err);
            }
            Err(err) => {
                error!(
                    worker = id,
                    path = %task.path.display(),
                    error = %err,
                    "Tree search failed, aborting scan"
                );
                let mut fatal = ctx.fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(err);
                }
                ctx.abort.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    ctx.global.lock().merge(&local);
    debug!(worker = id, files = local.counters.files, "Worker finished");
}

/// Process one target
///
/// Per-target problems come back as `TargetOutcome::Failed`; only a
/// transport error is returned as `Err`.
fn process_target<S: ExtentSource>(
    ctx: &WorkerContext<'_, S>,
    task: &TargetTask,
    buffer: &mut SearchBuffer,
    local: &mut GlobalStats,
) -> TransportResult<TargetOutcome> {
    let path = &task.path;

    if ctx.config.is_excluded(path) {
        return Ok(TargetOutcome::Ignored {
            path: path.clone(),
            reason: "excluded",
        });
    }

    let info = match ctx.source.inspect(path, task.top_level) {
        Ok(info) => info,
        Err(err) => return Ok(TargetOutcome::Failed(err)),
    };

    if ctx.config.one_file_system {
        if let Some(root_device) = task.root_device {
            if info.device != root_device {
                return Ok(TargetOutcome::Ignored {
                    path: path.clone(),
                    reason: "on another filesystem",
                });
            }
        }
    }

    match info.kind {
        TargetKind::Directory => {
            let children = match ctx.source.read_dir(path) {
                Ok(children) => children,
                Err(err) => return Ok(TargetOutcome::Failed(err)),
            };
            let root_device = task.root_device.unwrap_or(info.device);
            let count = children.len();
            for child in children {
                ctx.queue.push(TargetTask::child(child, root_device));
            }
            local.counters.directories += 1;
            ctx.progress.record_directory();
            Ok(TargetOutcome::Expanded {
                path: path.clone(),
                children: count,
            })
        }
        TargetKind::File => scan_file(ctx, task, buffer, local),
        TargetKind::Symlink | TargetKind::Other if task.top_level => {
            Ok(TargetOutcome::Failed(TargetError::NotFileOrDirectory { path: path.clone() }))
        }
        TargetKind::Symlink => Ok(TargetOutcome::Ignored {
            path: path.clone(),
            reason: "symlink",
        }),
        TargetKind::Other => Ok(TargetOutcome::Ignored {
            path: path.clone(),
            reason: "special file",
        }),
    }
}

/// Enumerate the extents of one regular file into `local`
fn scan_file<S: ExtentSource>(
    ctx: &WorkerContext<'_, S>,
    task: &TargetTask,
    buffer: &mut SearchBuffer,
    local: &mut GlobalStats,
) -> TransportResult<TargetOutcome> {
    let (mut transport, inode) = match ctx.source.open(&task.path) {
        Ok(opened) => opened,
        Err(err) => return Ok(TargetOutcome::Failed(err)),
    };

    let mut search = ExtentSearch::new(&mut transport, buffer, inode, ctx.config.items_per_query);
    let mut extents = 0u64;

    for record in search.by_ref() {
        if ctx.should_stop() {
            break;
        }
        match record? {
            SearchRecord::Extent(item) => {
                let claimed = item
                    .dedup_key()
                    .is_some_and(|key| ctx.dedup.try_claim(key));
                local.observe(&item, claimed);
                extents += 1;
            }
            SearchRecord::Skipped { key, reason } => {
                debug!(path = %task.path.display(), key = %key, reason = %reason, "Skipped item");
                local.counters.skipped_items += 1;
            }
        }
    }

    local.counters.queries += search.queries();
    local.counters.files += 1;
    ctx.progress.record_file(extents);

    Ok(TargetOutcome::Scanned {
        path: task.path.clone(),
        extents,
    })
}
