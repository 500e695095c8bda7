//! Seam to the concrete transfer jobs.
//!
//! The propagator owns scheduling, ordering and policy; what a leaf
//! actually does on the wire (GET, PUT, MKCOL, MOVE, DELETE, chunked
//! continuations) is behind [`TransferEngine`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use drift_journal::PollInfo;

use crate::item::{Direction, Instruction, ItemStatus, SyncItem};
use crate::progress::ProgressHandle;

/// How a job constrains concurrent scheduling around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobParallelism {
    /// Independent of all siblings.
    FullParallelism,
    /// Must be the only job running within its parent directory.
    WaitForFinishedInParentDirectory,
    /// Must be the only job running in the whole subtree.
    WaitForFinished,
}

/// Result of one executed leaf.
#[derive(Debug, Clone, Default)]
pub struct LeafOutcome {
    pub status: Option<ItemStatus>,
    pub error_string: Option<String>,
    /// HTTP status observed by the transport, for the restoration check.
    pub http_status: Option<u16>,
    /// Fresh server version token, when the operation produced one.
    pub etag: Option<String>,
    /// Server file id, e.g. assigned by a remote mkdir.
    pub file_id: Option<String>,
    pub size: Option<i64>,
}

impl LeafOutcome {
    pub fn success() -> Self {
        Self {
            status: Some(ItemStatus::Success),
            ..Default::default()
        }
    }

    pub fn error(status: ItemStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error_string: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn http_error(status: ItemStatus, http_status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error_string: Some(message.into()),
            http_status: Some(http_status),
            ..Default::default()
        }
    }

    pub fn final_status(&self) -> ItemStatus {
        self.status.unwrap_or(ItemStatus::NoStatus)
    }
}

/// Per-leaf execution context.
#[derive(Debug, Clone)]
pub struct LeafContext {
    /// One-way abort latch; transports cancel and report soft errors.
    pub abort: watch::Receiver<bool>,
    pub progress: ProgressHandle,
    pub chunk_size: u64,
    pub http_timeout: Duration,
}

impl LeafContext {
    pub fn abort_requested(&self) -> bool {
        *self.abort.borrow()
    }
}

/// The concrete transfer layer.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Execute the instruction carried by `item` and report how it went.
    /// Errors are statuses, not `Err` values.
    async fn execute(&self, item: SyncItem, ctx: LeafContext) -> LeafOutcome;

    /// Continue an outstanding server-side job recorded in the journal.
    async fn poll(&self, info: PollInfo, item: SyncItem, ctx: LeafContext) -> LeafOutcome;
}

/// Scheduling constraint of the leaf that will execute `item`.
pub fn leaf_parallelism(item: &SyncItem) -> JobParallelism {
    match item.instruction {
        Instruction::Remove if item.is_directory => JobParallelism::WaitForFinished,
        Instruction::Rename => JobParallelism::WaitForFinishedInParentDirectory,
        _ => JobParallelism::FullParallelism,
    }
}

/// Small transfers are cheap; the scheduler may pump extra jobs past the
/// soft budget for each of these.
pub fn is_likely_finished_quickly(item: &SyncItem, likely_quick_size: i64) -> bool {
    !item.is_directory && item.size < likely_quick_size
}

/// Disk space a running leaf holds reserved.
pub fn committed_disk_space(item: &SyncItem) -> i64 {
    let downloads_payload = matches!(
        item.instruction,
        Instruction::New | Instruction::Sync | Instruction::Conflict | Instruction::TypeChange
    );
    if item.direction == Direction::Down && !item.is_directory && downloads_payload {
        item.size.max(0)
    } else {
        0
    }
}
