//! Parallel extent scan
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │       Scheduler         │
//!                     │  - seeds target queue   │
//!                     │  - DedupTracker         │
//!                     │  - Mutex<GlobalStats>   │
//!                     └───────────┬─────────────┘
//!                                 │
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │  64K buf  │             │  64K buf  │             │  64K buf  │
//! │  local    │             │  local    │             │  local    │
//! │  stats    │             │  stats    │             │  stats    │
//! └───────────┘             └───────────┘             └───────────┘
//! ```
//!
//! Workers share the target queue, the dedup tracker and the failure list.
//! Statistics stay worker-local until the worker exits.

pub mod coordinator;
pub mod queue;
pub mod worker;

pub use coordinator::{ProgressSnapshot, ScanProgress, ScanReport, Scheduler};
pub use queue::{TargetQueue, TargetTask};
