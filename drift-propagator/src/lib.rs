//! Propagation engine: turns a sorted vector of per-path sync decisions
//! into a tree of concurrent jobs with bounded parallelism, directory
//! ordering guarantees and a unified error/blacklist policy.

pub mod blacklist;
pub mod config;
pub mod engine;
pub mod errors;
pub mod item;
pub mod jobs;
pub mod progress;
pub mod propagator;
pub mod restoration;

pub use config::PropagateConfig;
pub use engine::{
    is_likely_finished_quickly, leaf_parallelism, JobParallelism, LeafContext, LeafOutcome,
    TransferEngine,
};
pub use errors::{PropagateError, Result};
pub use item::{Direction, Instruction, ItemStatus, SyncItem};
pub use progress::{EventReceiver, EventSender, ProgressHandle, PropagatorEvent};
pub use propagator::{
    cleanup_polls, AbortHandle, DiskSpaceProbe, DiskSpaceResult, PropagateReport, Propagator,
};
