//! Target queue with completion tracking
//!
//! Workers pull targets from a shared crossbeam channel and push the
//! children of every directory they expand back onto it. The channel is
//! unbounded because every worker is also a producer: a bounded queue
//! could leave all workers blocked on a full send.
//!
//! Completion is tracked with a pending counter: it is raised when a task
//! is pushed and lowered when the `TaskGuard` for that task drops, which
//! happens only after the task's children were pushed. Zero pending means
//! the scan has nothing left to do.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A path to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTask {
    pub path: PathBuf,

    /// Named on the command line rather than found in a directory
    pub top_level: bool,

    /// Device of the top-level path this task descends from
    pub root_device: Option<u64>,
}

impl TargetTask {
    /// Task for a path given on the command line
    pub fn top_level(path: PathBuf) -> Self {
        Self {
            path,
            top_level: true,
            root_device: None,
        }
    }

    /// Task for an entry found while expanding a directory
    pub fn child(path: PathBuf, root_device: u64) -> Self {
        Self {
            path,
            top_level: false,
            root_device: Some(root_device),
        }
    }
}

/// Shared queue of targets
pub struct TargetQueue {
    sender: Sender<TargetTask>,
    receiver: Receiver<TargetTask>,

    /// Tasks queued or being processed
    pending: AtomicUsize,
}

impl TargetQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: AtomicUsize::new(0),
        }
    }

    /// Add a task
    pub fn push(&self, task: TargetTask) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // Both channel ends live in `self`, so the send cannot fail.
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Take a task, waiting at most `timeout`
    ///
    /// The caller must hold a [`TaskGuard`] while processing the task.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TargetTask> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Tasks queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check if all work is complete
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    fn finish_task(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for TargetQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard marking one dequeued task as in flight
pub struct TaskGuard<'a> {
    queue: &'a TargetQueue,
}

impl<'a> TaskGuard<'a> {
    pub fn new(queue: &'a TargetQueue) -> Self {
        Self { queue }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish_task();
    }
}
