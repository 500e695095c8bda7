//! The propagator: consumes the sorted item vector once, materializes the
//! job tree and drives it to completion within the concurrency budget.
//!
//! The propagator task is the only owner of the tree and the items; leaves
//! execute on spawned tasks and report back over a channel, so all state
//! mutation happens here between messages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use drift_journal::{PollInfo, SyncJournal};

use crate::blacklist;
use crate::config::PropagateConfig;
use crate::engine::{self, JobParallelism, LeafContext, LeafOutcome, TransferEngine};
use crate::errors::{PropagateError, Result};
use crate::item::{Direction, Instruction, ItemStatus, SyncItem};
use crate::jobs::{self, JobId, JobKind, JobState, JobTree};
use crate::progress::{EventSender, ProgressHandle, PropagatorEvent};
use crate::restoration::{self, Compensation};

const METADATA_WRITE_ERROR: &str = "Error writing metadata to the database";

/// Probe for free bytes on the device holding the local folder. `None`
/// skips the check (e.g. on exotic mounts the probe cannot answer for).
pub type DiskSpaceProbe = Arc<dyn Fn(&Path) -> Option<i64> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskSpaceResult {
    DiskSpaceOk,
    /// Launching this download would cut into the configured reserve.
    DiskSpaceFailure,
    /// The device is critically full; nothing should be written at all.
    DiskSpaceCritical,
}

/// One-way abort latch, shareable with whoever supervises the run.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Completion message from a spawned leaf back to the propagator task.
enum Completion {
    Leaf { job: JobId, outcome: LeafOutcome },
    Restore { job: JobId, outcome: LeafOutcome },
}

/// Final result of one propagation run.
#[derive(Debug)]
pub struct PropagateReport {
    pub status: ItemStatus,
    /// The run discovered situations only a further sync pass can settle.
    pub another_sync_needed: bool,
    /// Descendant operations absorbed per removed directory.
    pub affected_counts: HashMap<String, u32>,
}

pub struct Propagator {
    config: PropagateConfig,
    journal: Arc<SyncJournal>,
    engine: Arc<dyn TransferEngine>,
    local_dir: PathBuf,
    /// Remote folder this sync run maps to, for the shared-directory check.
    remote_folder: String,
    events: Option<EventSender>,
    disk_space_probe: Option<DiskSpaceProbe>,
    rate_limited: bool,

    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,

    tree: JobTree,
    active: Vec<JobId>,
    pending_finalize: Vec<JobId>,
    another_sync_needed: bool,
}

impl Propagator {
    pub fn new(
        config: PropagateConfig,
        journal: Arc<SyncJournal>,
        engine: Arc<dyn TransferEngine>,
        local_dir: impl Into<PathBuf>,
        remote_folder: impl Into<String>,
    ) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            journal,
            engine,
            local_dir: local_dir.into(),
            remote_folder: remote_folder.into(),
            events: None,
            disk_space_probe: None,
            rate_limited: false,
            abort_tx: Arc::new(abort_tx),
            abort_rx,
            completions_tx,
            completions_rx,
            tree: JobTree::empty(),
            active: Vec::new(),
            pending_finalize: Vec::new(),
            another_sync_needed: false,
        }
    }

    /// Attach a listener for progress and item-completed events.
    pub fn set_event_sender(&mut self, events: EventSender) {
        self.events = Some(events);
    }

    pub fn set_disk_space_probe(&mut self, probe: DiskSpaceProbe) {
        self.disk_space_probe = Some(probe);
    }

    /// A bandwidth limit is active; transfers run one at a time.
    pub fn set_rate_limited(&mut self, rate_limited: bool) {
        self.rate_limited = rate_limited;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    fn abort_requested(&self) -> bool {
        *self.abort_rx.borrow()
    }

    /// Propagator-wide abort: refuse new leaves, let the running ones be
    /// cancelled by their transport.
    fn abort(&mut self) {
        if !self.abort_requested() {
            info!("aborting propagation");
            let _ = self.abort_tx.send(true);
        }
    }

    /// Run the propagation of `items` to completion.
    ///
    /// `items` must be sorted by destination path, prefixes first.
    pub async fn run(mut self, items: Vec<SyncItem>) -> Result<PropagateReport> {
        assert!(
            items
                .windows(2)
                .all(|pair| pair[0].destination() <= pair[1].destination()),
            "propagation input must be sorted by destination path"
        );

        let item_count = items.len();
        let (tree, another_sync_needed) = jobs::build_tree(items);
        self.tree = tree;
        self.another_sync_needed = another_sync_needed;
        debug!(
            items = item_count,
            jobs = self.tree.slots.len(),
            "propagation job tree built"
        );

        loop {
            // Pump scheduling and finalization until the tree is stable.
            loop {
                self.process_finalizations();
                if self.root_finished() {
                    break;
                }
                self.schedule_pass();
                if self.pending_finalize.is_empty() {
                    break;
                }
            }
            if self.root_finished() {
                break;
            }
            if self.active.is_empty() {
                // Nothing is running and nothing may start: either we are
                // aborting with jobs still queued, or the tree is wedged.
                if !self.abort_requested() {
                    warn!("scheduler stalled with idle jobs remaining, finishing early");
                }
                let status = self.tree.directory(self.tree.root).sub.final_status();
                self.finish_directory(self.tree.root, status);
                break;
            }
            match self.completions_rx.recv().await {
                Some(completion) => self.handle_completion(completion),
                None => break,
            }
        }

        let mut affected_counts = HashMap::new();
        for slot in &self.tree.slots {
            if let JobKind::Directory(dir) = &slot.kind {
                if let Some(item) = &dir.item {
                    if item.instruction == Instruction::Remove {
                        affected_counts.insert(item.file.clone(), dir.affected_count);
                    }
                }
            }
        }

        let status = self.tree.directory(self.tree.root).final_status;
        info!(?status, "propagation finished");
        Ok(PropagateReport {
            status,
            another_sync_needed: self.another_sync_needed,
            affected_counts,
        })
    }

    fn root_finished(&self) -> bool {
        self.tree.slots[self.tree.root].state == JobState::Finished
    }

    // ---- scheduling ----------------------------------------------------

    /// Keep starting leaves until the budget is used up or nothing more
    /// can start right now.
    fn schedule_pass(&mut self) {
        if self.abort_requested() {
            return;
        }
        loop {
            let active = self.active.len();
            let soft = self.config.soft_max_parallel(self.rate_limited);
            let started = if active < soft {
                self.schedule_self_or_child(self.tree.root)
            } else if active < self.config.hard_max_parallel {
                // Among the first `soft` active jobs, each one that is
                // likely to finish quickly buys one extra slot. As jobs
                // finish, others move up and get counted in turn.
                let likely_quick = self
                    .active
                    .iter()
                    .take(soft)
                    .filter(|id| self.is_likely_quick(**id))
                    .count();
                if active < soft + likely_quick {
                    debug!(active, likely_quick, "pumping in another request");
                    self.schedule_self_or_child(self.tree.root)
                } else {
                    false
                }
            } else {
                false
            };
            if !started {
                break;
            }
        }
    }

    fn is_likely_quick(&self, id: JobId) -> bool {
        match &self.tree.slots[id].kind {
            JobKind::Leaf(leaf) => {
                engine::is_likely_finished_quickly(&leaf.item, self.config.likely_quick_size)
            }
            JobKind::Directory(_) => false,
        }
    }

    /// Returns true iff exactly one new leaf was started in the subtree.
    fn schedule_self_or_child(&mut self, id: JobId) -> bool {
        if self.tree.slots[id].state == JobState::Finished {
            return false;
        }
        match &self.tree.slots[id].kind {
            JobKind::Leaf(_) => {
                if self.tree.slots[id].state == JobState::NotYetStarted {
                    self.start_leaf(id)
                } else {
                    false
                }
            }
            JobKind::Directory(_) => {
                if self.tree.slots[id].state == JobState::NotYetStarted {
                    self.tree.slots[id].state = JobState::Running;
                }
                if let Some(first) = self.tree.directory(id).first_job {
                    match self.tree.slots[first].state {
                        JobState::NotYetStarted => return self.start_leaf(first),
                        // The directory is not materialized yet; nothing
                        // below it may start.
                        JobState::Running => return false,
                        JobState::Finished => {}
                    }
                }
                self.schedule_composite(id)
            }
        }
    }

    fn schedule_composite(&mut self, dir_id: JobId) -> bool {
        // Give the running children a chance to start something first.
        let running: Vec<JobId> = self.tree.directory(dir_id).sub.running.clone();
        for child in running {
            if self.schedule_self_or_child(child) {
                return true;
            }
            // A non-parallel sibling blocks the rest of this composite
            // until it finishes.
            if self.parallelism(child) != JobParallelism::FullParallelism {
                return false;
            }
        }

        if let Some(next) = self.tree.directory_mut(dir_id).sub.jobs_to_do.pop_front() {
            self.tree.directory_mut(dir_id).sub.running.push(next);
            return self.schedule_self_or_child(next);
        }
        while let Some(task) = self.tree.directory_mut(dir_id).sub.tasks_to_do.pop_front() {
            let Some(leaf) = jobs::create_task_leaf(&mut self.tree, dir_id, task) else {
                continue;
            };
            self.tree.directory_mut(dir_id).sub.running.push(leaf);
            return self.start_leaf(leaf);
        }

        // Neither we nor the children have anything left: finalize, but
        // deferred, never while a caller iterates the running list.
        if self.tree.directory(dir_id).sub.is_drained() {
            self.queue_finalize(dir_id);
        }
        false
    }

    /// Most restrictive parallelism among the job and its running
    /// descendants.
    fn parallelism(&self, id: JobId) -> JobParallelism {
        match &self.tree.slots[id].kind {
            JobKind::Leaf(leaf) => engine::leaf_parallelism(&leaf.item),
            JobKind::Directory(dir) => {
                if let Some(first) = dir.first_job {
                    if self.tree.slots[first].state != JobState::Finished
                        && self.parallelism(first) != JobParallelism::FullParallelism
                    {
                        return JobParallelism::WaitForFinished;
                    }
                }
                for child in &dir.sub.running {
                    if self.parallelism(*child) != JobParallelism::FullParallelism {
                        return JobParallelism::WaitForFinished;
                    }
                }
                JobParallelism::FullParallelism
            }
        }
    }

    fn start_leaf(&mut self, id: JobId) -> bool {
        self.tree.slots[id].state = JobState::Running;
        self.active.push(id);
        let item = self.tree.leaf(id).item.clone();
        debug!(file = %item.destination(), instruction = ?item.instruction, "starting job");

        // Ignored and erroring items complete without touching the engine.
        if matches!(item.instruction, Instruction::Ignore | Instruction::Error) {
            let status = if item.instruction == Instruction::Error {
                ItemStatus::NormalError
            } else {
                ItemStatus::FileIgnored
            };
            let outcome = LeafOutcome {
                status: Some(status),
                error_string: (!item.error_string.is_empty()).then(|| item.error_string.clone()),
                ..Default::default()
            };
            let _ = self.completions_tx.send(Completion::Leaf { job: id, outcome });
            return true;
        }

        // Downloads pre-flight the disk before they reserve space.
        if engine::committed_disk_space(&item) > 0 {
            match self.disk_space_check() {
                DiskSpaceResult::DiskSpaceOk => {}
                DiskSpaceResult::DiskSpaceFailure => {
                    let outcome = LeafOutcome::error(
                        ItemStatus::NormalError,
                        format!(
                            "Insufficient remaining disk space in {}",
                            self.local_dir.display()
                        ),
                    );
                    let _ = self.completions_tx.send(Completion::Leaf { job: id, outcome });
                    return true;
                }
                DiskSpaceResult::DiskSpaceCritical => {
                    let outcome = LeafOutcome::error(
                        ItemStatus::FatalError,
                        format!(
                            "Free space in {} is below the critical limit",
                            self.local_dir.display()
                        ),
                    );
                    let _ = self.completions_tx.send(Completion::Leaf { job: id, outcome });
                    return true;
                }
            }
        }

        let ctx = self.leaf_context(&item);
        let engine = self.engine.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = engine.execute(item, ctx).await;
            let _ = completions.send(Completion::Leaf { job: id, outcome });
        });
        true
    }

    fn leaf_context(&self, item: &SyncItem) -> LeafContext {
        LeafContext {
            abort: self.abort_rx.clone(),
            progress: ProgressHandle::new(item.file.clone(), self.events.clone()),
            chunk_size: self.config.chunk_size,
            http_timeout: self.config.http_timeout,
        }
    }

    /// Compare free disk space against the reserve thresholds, accounting
    /// for what the running downloads already committed to.
    pub fn disk_space_check(&self) -> DiskSpaceResult {
        let Some(probe) = &self.disk_space_probe else {
            return DiskSpaceResult::DiskSpaceOk;
        };
        let Some(free) = probe(&self.local_dir) else {
            return DiskSpaceResult::DiskSpaceOk;
        };
        if free < 0 {
            return DiskSpaceResult::DiskSpaceOk;
        }
        if free < self.config.critical_free_space_limit {
            return DiskSpaceResult::DiskSpaceCritical;
        }
        if free - self.committed_disk_space(self.tree.root) < self.config.free_space_limit {
            return DiskSpaceResult::DiskSpaceFailure;
        }
        DiskSpaceResult::DiskSpaceOk
    }

    fn committed_disk_space(&self, id: JobId) -> i64 {
        match &self.tree.slots[id].kind {
            JobKind::Leaf(leaf) => {
                if self.tree.slots[id].state == JobState::Running {
                    engine::committed_disk_space(&leaf.item)
                } else {
                    0
                }
            }
            JobKind::Directory(dir) => {
                let mut committed = 0;
                if let Some(first) = dir.first_job {
                    committed += self.committed_disk_space(first);
                }
                for child in &dir.sub.running {
                    committed += self.committed_disk_space(*child);
                }
                committed
            }
        }
    }

    // ---- completion pipeline -------------------------------------------

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Leaf { job, outcome } => self.on_leaf_outcome(job, outcome),
            Completion::Restore { job, outcome } => self.on_restore_outcome(job, outcome),
        }
    }

    fn on_leaf_outcome(&mut self, job: JobId, outcome: LeafOutcome) {
        {
            // Adopt what the transfer learned from the server.
            let leaf = self.tree.leaf_mut(job);
            if let Some(etag) = &outcome.etag {
                leaf.item.etag = etag.clone();
            }
            if let Some(file_id) = &outcome.file_id {
                leaf.item.file_id = file_id.clone();
            }
            if let Some(size) = outcome.size {
                leaf.item.size = size;
            }
        }

        let status = outcome.final_status();
        let error = outcome.error_string.clone().unwrap_or_default();

        // A 403 inside shared territory gets one compensation attempt
        // before the error is allowed through.
        if status.is_error() && outcome.http_status == Some(403) {
            let item = self.tree.leaf(job).item.clone();
            if restoration::is_in_shared_directory(&self.remote_folder, &item.file)
                && !self.tree.leaf(job).restore_attempted
            {
                match restoration::compensation_for(&item, Utc::now().timestamp()) {
                    Compensation::Restore {
                        item: restore_item,
                        needs_another_sync,
                    } => {
                        if needs_another_sync {
                            if let Err(error) =
                                self.journal.avoid_renames_on_next_sync(&item.file)
                            {
                                warn!(%error, "could not disable rename detection for restore");
                            }
                            self.another_sync_needed = true;
                        }
                        let leaf = self.tree.leaf_mut(job);
                        leaf.restore_attempted = true;
                        leaf.restore_message = if error.is_empty() {
                            "the operation was refused inside a shared folder".to_string()
                        } else {
                            error
                        };
                        let ctx = self.leaf_context(&restore_item);
                        let engine = self.engine.clone();
                        let completions = self.completions_tx.clone();
                        tokio::spawn(async move {
                            let outcome = engine.execute(restore_item, ctx).await;
                            let _ = completions.send(Completion::Restore { job, outcome });
                        });
                        // The job stays active until the restore reports.
                        return;
                    }
                    Compensation::GiveUp => {}
                }
            }
        }

        self.finish_leaf(job, status, error);
    }

    fn on_restore_outcome(&mut self, job: JobId, outcome: LeafOutcome) {
        let message = self.tree.leaf(job).restore_message.clone();
        let (status, error) = restoration::map_restore_outcome(outcome.final_status(), &message);
        self.finish_leaf(job, status, error);
    }

    /// The common terminal pipeline of every leaf: restoration flag,
    /// abort downgrade, blacklist policy, journal bookkeeping, event.
    fn finish_leaf(&mut self, job: JobId, status: ItemStatus, error: String) {
        self.active.retain(|active| *active != job);
        let mut status = status;

        {
            let leaf = self.tree.leaf_mut(job);
            if leaf.item.is_restoration {
                if matches!(status, ItemStatus::Success | ItemStatus::Conflict) {
                    status = ItemStatus::Restoration;
                } else {
                    leaf.item.error_string = format!(
                        "{}; Restoration Failed: {}",
                        leaf.item.error_string, error
                    );
                }
            } else if leaf.item.error_string.is_empty() {
                leaf.item.error_string = error;
            }
        }

        // An abort is in progress: whatever failed now is only collateral.
        if self.abort_requested()
            && matches!(status, ItemStatus::NormalError | ItemStatus::FatalError)
        {
            status = ItemStatus::SoftError;
        }

        let now = Utc::now().timestamp();
        match status {
            ItemStatus::SoftError | ItemStatus::NormalError | ItemStatus::FatalError => {
                // Normal errors blacklist aggressively, everything else
                // only on explicit request.
                let item = self.tree.leaf(job).item.clone();
                if status == ItemStatus::NormalError || item.error_may_be_blacklisted {
                    match blacklist::blacklist_check(&self.journal, &item, now, &self.config) {
                        Ok(suppress) => {
                            if suppress && item.has_blacklist_entry {
                                // Was blacklisted and stays blacklisted:
                                // not an error the user needs again.
                                status = ItemStatus::FileIgnored;
                                let leaf = self.tree.leaf_mut(job);
                                leaf.item.error_string = format!(
                                    "{} {}",
                                    blacklist::CONTINUE_BLACKLISTING,
                                    leaf.item.error_string
                                );
                            }
                        }
                        Err(error) => warn!(%error, "blacklist update failed"),
                    }
                }
            }
            ItemStatus::Success | ItemStatus::Restoration => {
                let item = self.tree.leaf(job).item.clone();
                if let Err(error) = blacklist::wipe_after_success(&self.journal, &item) {
                    warn!(%error, "blacklist cleanup failed");
                }
                if let Err(error) = self.record_leaf_success(&item) {
                    warn!(file = %item.file, %error, "journal write after transfer failed");
                    status = ItemStatus::FatalError;
                    self.tree.leaf_mut(job).item.error_string = METADATA_WRITE_ERROR.to_string();
                }
            }
            ItemStatus::Conflict | ItemStatus::FileIgnored | ItemStatus::NoStatus => {}
        }

        self.tree.leaf_mut(job).item.status = status;
        let item = self.tree.leaf(job).item.clone();
        self.emit(PropagatorEvent::ItemCompleted { item });

        if status == ItemStatus::FatalError {
            self.abort();
        }

        self.tree.slots[job].state = JobState::Finished;
        self.on_child_finished(job, status);
    }

    /// Journal bookkeeping after a successfully propagated leaf.
    fn record_leaf_success(&self, item: &SyncItem) -> Result<()> {
        match item.instruction {
            Instruction::Remove => {
                self.journal.delete_file_record(&item.file, item.is_directory)?;
            }
            Instruction::Rename => {
                self.journal
                    .delete_file_record(&item.original_file, item.is_directory)?;
                let mut record = item.to_file_record();
                record.path = item.destination().to_string();
                self.journal.set_file_record(&record)?;
            }
            Instruction::New
            | Instruction::Sync
            | Instruction::Conflict
            | Instruction::TypeChange => {
                // Directory rows are written by the directory job once the
                // whole subtree went through.
                if !item.is_directory {
                    self.journal.set_file_record(&item.to_file_record())?;
                    match item.direction {
                        Direction::Down => self.journal.delete_download_info(&item.file)?,
                        Direction::Up => self.journal.delete_upload_info(&item.file)?,
                        Direction::None => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ---- finalization cascade ------------------------------------------

    fn queue_finalize(&mut self, id: JobId) {
        if !self.pending_finalize.contains(&id) {
            self.pending_finalize.push(id);
        }
    }

    fn process_finalizations(&mut self) {
        while let Some(id) = self.pending_finalize.pop() {
            self.finalize_directory(id);
        }
    }

    /// Called when a child reached Finished. Updates the parent's
    /// bookkeeping and may drain it in turn.
    fn on_child_finished(&mut self, child: JobId, status: ItemStatus) {
        let Some(parent) = self.tree.slots[child].parent else {
            return;
        };
        if self.tree.slots[parent].state == JobState::Finished {
            return;
        }

        if self.tree.directory(parent).first_job == Some(child) {
            if !matches!(status, ItemStatus::Success | ItemStatus::Restoration) {
                // The directory could not be materialized; the subtree
                // has nothing to run against.
                let dir = self.tree.directory_mut(parent);
                dir.sub.jobs_to_do.clear();
                dir.sub.tasks_to_do.clear();
                self.finish_directory(parent, status);
                return;
            }
            // Adopt what the first job learned, the file id of a fresh
            // mkdir in particular.
            let (etag, file_id) = {
                let leaf = self.tree.leaf(child);
                (leaf.item.etag.clone(), leaf.item.file_id.clone())
            };
            let dir = self.tree.directory_mut(parent);
            if let Some(dir_item) = dir.item.as_mut() {
                if dir_item.file_id.is_empty() && !file_id.is_empty() {
                    dir_item.file_id = file_id;
                }
                if !etag.is_empty() {
                    dir_item.etag = etag;
                }
            }
            return;
        }

        let dir = self.tree.directory_mut(parent);
        dir.sub.running.retain(|running| *running != child);
        dir.sub.record_child_status(status);
        if dir.sub.is_drained() {
            self.queue_finalize(parent);
        }
    }

    /// A directory whose children all terminated: write its own metadata
    /// row and propagate the aggregated status upwards.
    fn finalize_directory(&mut self, id: JobId) {
        if self.tree.slots[id].state == JobState::Finished {
            return;
        }
        if !self.tree.directory(id).sub.is_drained() {
            return;
        }
        if let Some(first) = self.tree.directory(id).first_job {
            if self.tree.slots[first].state != JobState::Finished {
                return;
            }
        }

        let mut status = self.tree.directory(id).sub.final_status();
        if let Some(mut item) = self.tree.directory(id).item.clone() {
            if status == ItemStatus::Success {
                if !item.rename_target.is_empty() {
                    if item.instruction == Instruction::Rename
                        && item.original_file != item.rename_target
                    {
                        // Drop the stale rows under the old name.
                        if let Err(error) =
                            self.journal.delete_file_record(&item.original_file, true)
                        {
                            warn!(%error, "could not delete renamed directory records");
                        }
                    }
                    item.file = item.rename_target.clone();
                }

                // New and renamed directories always get their row updated
                // once the content is through; otherwise the directory
                // could exist locally without being recorded.
                if matches!(
                    item.instruction,
                    Instruction::Rename | Instruction::New | Instruction::UpdateMetadata
                ) {
                    if let Err(error) = self.journal.set_file_record(&item.to_file_record()) {
                        warn!(file = %item.file, %error, "metadata write for directory failed");
                        status = ItemStatus::FatalError;
                        item.error_string = METADATA_WRITE_ERROR.to_string();
                    }
                }
                item.status = status;
                self.tree.directory_mut(id).item = Some(item);
            }
        }
        self.finish_directory(id, status);
    }

    fn finish_directory(&mut self, id: JobId, status: ItemStatus) {
        self.tree.slots[id].state = JobState::Finished;
        self.tree.directory_mut(id).final_status = status;
        self.on_child_finished(id, status);
    }

    fn emit(&self, event: PropagatorEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Drain the outstanding server-side continuations recorded in the
/// journal. Runs before a new propagation so chunked uploads the server is
/// still assembling are settled first.
pub async fn cleanup_polls(
    journal: &SyncJournal,
    engine: &dyn TransferEngine,
    config: &PropagateConfig,
) -> Result<()> {
    for info in journal.get_poll_infos()? {
        let Some(record) = journal.get_file_record(&info.file)? else {
            continue;
        };
        let mut item = SyncItem::from_record(&record);
        let (_abort_tx, abort_rx) = watch::channel(false);
        let ctx = LeafContext {
            abort: abort_rx,
            progress: ProgressHandle::disconnected(info.file.clone()),
            chunk_size: config.chunk_size,
            http_timeout: config.http_timeout,
        };
        let outcome = engine.poll(info.clone(), item.clone(), ctx).await;
        match outcome.final_status() {
            ItemStatus::FatalError => {
                return Err(PropagateError::PollFailed(
                    outcome.error_string.unwrap_or_default(),
                ));
            }
            ItemStatus::Success => {
                if let Some(etag) = outcome.etag {
                    item.etag = etag;
                }
                if let Some(file_id) = outcome.file_id {
                    item.file_id = file_id;
                }
                if let Some(size) = outcome.size {
                    item.size = size;
                }
                if journal.set_file_record(&item.to_file_record()).is_err() {
                    return Err(PropagateError::PollFailed(METADATA_WRITE_ERROR.to_string()));
                }
                journal.set_poll_info(&PollInfo {
                    url: String::new(),
                    ..info
                })?;
            }
            other => {
                debug!(file = %info.file, status = ?other, "poll continuation still pending");
            }
        }
    }
    Ok(())
}
