//! The job tree: directory jobs with an optional first job and a composite
//! of sub-jobs, leaves for concrete transfers.
//!
//! Jobs live in an arena indexed by [`JobId`]; ownership stays with the
//! propagator and completion notifications flow up through parent indices,
//! never through back-references.

use std::collections::VecDeque;

use tracing::warn;

use crate::item::{Direction, Instruction, ItemStatus, SyncItem};

pub type JobId = usize;

/// One-way job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotYetStarted,
    Running,
    Finished,
}

/// Ordered work of one directory: queued sub-jobs, queued plain tasks that
/// become leaves lazily, and the currently running children.
#[derive(Debug, Default)]
pub struct Composite {
    pub jobs_to_do: VecDeque<JobId>,
    pub tasks_to_do: VecDeque<SyncItem>,
    pub running: Vec<JobId>,
    worst_error: Option<ItemStatus>,
}

impl Composite {
    pub fn is_drained(&self) -> bool {
        self.jobs_to_do.is_empty() && self.tasks_to_do.is_empty() && self.running.is_empty()
    }

    /// Track child failures that must fail this composite. Soft errors are
    /// deliberately not recorded: an aborted or to-be-retried item does not
    /// fail the propagation as a whole.
    pub fn record_child_status(&mut self, status: ItemStatus) {
        if status.fails_composite() {
            self.worst_error = Some(match self.worst_error {
                Some(worst) => worst.worst(status),
                None => status,
            });
        }
    }

    pub fn final_status(&self) -> ItemStatus {
        self.worst_error.unwrap_or(ItemStatus::Success)
    }
}

#[derive(Debug)]
pub struct LeafJob {
    pub item: SyncItem,
    /// Whether a compensating restore job was already dispatched.
    pub restore_attempted: bool,
    pub restore_message: String,
}

impl LeafJob {
    fn new(item: SyncItem) -> Self {
        Self {
            item,
            restore_attempted: false,
            restore_message: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct DirectoryJob {
    /// The directory's own item; the root job has none.
    pub item: Option<SyncItem>,
    /// Materializes the directory itself (mkdir, remove, rename). Must
    /// finish successfully before any child may run.
    pub first_job: Option<JobId>,
    pub sub: Composite,
    /// Descendant operations absorbed by removing this directory.
    pub affected_count: u32,
    pub final_status: ItemStatus,
}

#[derive(Debug)]
pub enum JobKind {
    Leaf(LeafJob),
    Directory(DirectoryJob),
}

#[derive(Debug)]
pub struct JobSlot {
    pub state: JobState,
    pub parent: Option<JobId>,
    pub kind: JobKind,
}

#[derive(Debug)]
pub struct JobTree {
    pub slots: Vec<JobSlot>,
    pub root: JobId,
}

impl JobTree {
    pub fn empty() -> Self {
        let root_slot = JobSlot {
            state: JobState::NotYetStarted,
            parent: None,
            kind: JobKind::Directory(DirectoryJob {
                item: None,
                first_job: None,
                sub: Composite::default(),
                affected_count: 0,
                final_status: ItemStatus::NoStatus,
            }),
        };
        Self {
            slots: vec![root_slot],
            root: 0,
        }
    }

    fn alloc(&mut self, parent: Option<JobId>, kind: JobKind) -> JobId {
        let id = self.slots.len();
        self.slots.push(JobSlot {
            state: JobState::NotYetStarted,
            parent,
            kind,
        });
        id
    }

    fn alloc_directory(&mut self, item: SyncItem, first_job: Option<JobId>) -> JobId {
        self.alloc(
            None,
            JobKind::Directory(DirectoryJob {
                item: Some(item),
                first_job,
                sub: Composite::default(),
                affected_count: 0,
                final_status: ItemStatus::NoStatus,
            }),
        )
    }

    pub fn directory(&self, id: JobId) -> &DirectoryJob {
        match &self.slots[id].kind {
            JobKind::Directory(dir) => dir,
            JobKind::Leaf(_) => unreachable!("job {id} is not a directory"),
        }
    }

    pub fn directory_mut(&mut self, id: JobId) -> &mut DirectoryJob {
        match &mut self.slots[id].kind {
            JobKind::Directory(dir) => dir,
            JobKind::Leaf(_) => unreachable!("job {id} is not a directory"),
        }
    }

    pub fn leaf(&self, id: JobId) -> &LeafJob {
        match &self.slots[id].kind {
            JobKind::Leaf(leaf) => leaf,
            JobKind::Directory(_) => unreachable!("job {id} is not a leaf"),
        }
    }

    pub fn leaf_mut(&mut self, id: JobId) -> &mut LeafJob {
        match &mut self.slots[id].kind {
            JobKind::Leaf(leaf) => leaf,
            JobKind::Directory(_) => unreachable!("job {id} is not a leaf"),
        }
    }
}

/// A task whose instruction needs no job at all.
fn is_useless_task(item: &SyncItem) -> bool {
    matches!(
        item.instruction,
        Instruction::None | Instruction::UpdateMetadata
    )
}

/// Whether a directory item needs a first job to materialize itself.
fn needs_first_job(item: &SyncItem) -> bool {
    !is_useless_task(item)
}

/// Build the whole job tree from the sorted item vector in a single pass.
///
/// Returns the tree and whether another sync pass was requested during
/// construction (deferred type changes).
pub fn build_tree(mut items: Vec<SyncItem>) -> (JobTree, bool) {
    let mut tree = JobTree::empty();
    let root = tree.root;

    let mut stack: Vec<(String, JobId)> = vec![(String::new(), root)];
    // Removing a directory is deferred to the very end of the run, renames
    // out of it may still need its content.
    let mut directories_to_remove: VecDeque<JobId> = VecDeque::new();
    let mut removed_directory = String::new();
    let mut another_sync_needed = false;

    let count = items.len();
    for index in 0..count {
        let item = items[index].clone();

        if !removed_directory.is_empty() && item.file.starts_with(&removed_directory) {
            match item.instruction {
                Instruction::Remove | Instruction::New | Instruction::TypeChange => {
                    // Swallowed by the removal of the whole tree. New
                    // entries inside it stem from an earlier aborted run
                    // whose directory etag never made it to the journal.
                    if let Some(&removal) = directories_to_remove.front() {
                        if let JobKind::Directory(dir) = &mut tree.slots[removal].kind {
                            dir.affected_count += 1;
                        }
                    }
                    continue;
                }
                Instruction::Ignore => continue,
                Instruction::Rename => {
                    // Fine: the rename executes before the deletion.
                }
                _ => {
                    warn!(
                        file = %item.file,
                        instruction = ?item.instruction,
                        "job within a removed directory, this should not happen"
                    );
                }
            }
        }

        while !item
            .destination()
            .starts_with(stack.last().map(|(prefix, _)| prefix.as_str()).unwrap_or(""))
        {
            stack.pop();
        }
        let top = stack.last().map(|(_, id)| *id).unwrap_or(root);

        if item.is_directory {
            if item.instruction == Instruction::TypeChange && item.direction == Direction::Up {
                // A local directory replaces what used to be a remote
                // file. Permissions were evaluated against the file that
                // is about to disappear; defer everything below to the
                // next pass.
                let prefix = format!("{}/", item.destination());
                for later in items.iter_mut().skip(index + 1) {
                    if later.destination().starts_with(&prefix) {
                        later.instruction = Instruction::None;
                        another_sync_needed = true;
                    }
                }
            }

            let first_job = if needs_first_job(&item) {
                Some(tree.alloc(None, JobKind::Leaf(LeafJob::new(item.clone()))))
            } else {
                None
            };
            let dir_id = tree.alloc_directory(item.clone(), first_job);
            if let Some(first) = first_job {
                tree.slots[first].parent = Some(dir_id);
            }

            if item.instruction == Instruction::Remove {
                directories_to_remove.push_front(dir_id);
                removed_directory = format!("{}/", item.file);

                // A doomed directory must not have the etags of its
                // ancestors refreshed in the same run: that would happen
                // before the actual removal.
                for (_, ancestor) in stack.iter() {
                    if let JobKind::Directory(dir) = &mut tree.slots[*ancestor].kind {
                        if let Some(ancestor_item) = dir.item.as_mut() {
                            if ancestor_item.instruction == Instruction::UpdateMetadata {
                                ancestor_item.instruction = Instruction::None;
                            }
                        }
                    }
                }
            } else {
                tree.slots[dir_id].parent = Some(top);
                tree.directory_mut(top).sub.jobs_to_do.push_back(dir_id);
            }
            stack.push((format!("{}/", item.destination()), dir_id));
        } else if item.instruction == Instruction::TypeChange {
            // Executing this will remove the existing directory, so defer.
            let leaf = tree.alloc(None, JobKind::Leaf(LeafJob::new(item.clone())));
            directories_to_remove.push_front(leaf);
            removed_directory = format!("{}/", item.file);
        } else {
            tree.directory_mut(top).sub.tasks_to_do.push_back(item);
        }
    }

    for removal in directories_to_remove {
        tree.slots[removal].parent = Some(root);
        tree.directory_mut(root).sub.jobs_to_do.push_back(removal);
    }

    (tree, another_sync_needed)
}

/// Lazily turn a queued task into a leaf job, skipping instructions that
/// need no propagation at all.
pub fn create_task_leaf(tree: &mut JobTree, parent: JobId, item: SyncItem) -> Option<JobId> {
    if is_useless_task(&item) {
        warn!(
            file = %item.destination(),
            instruction = ?item.instruction,
            "useless task, nothing to propagate"
        );
        return None;
    }
    Some(tree.alloc(Some(parent), JobKind::Leaf(LeafJob::new(item))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(path: &str) -> SyncItem {
        SyncItem::new(path, Instruction::New, Direction::Down)
    }

    #[test]
    fn flat_items_become_tasks_of_the_root() {
        let (tree, another) = build_tree(vec![new_file("a"), new_file("b"), new_file("c")]);
        assert!(!another);
        let root = tree.directory(tree.root);
        assert_eq!(root.sub.tasks_to_do.len(), 3);
        assert!(root.sub.jobs_to_do.is_empty());
    }

    #[test]
    fn one_directory_job_per_directory_item() {
        let items = vec![
            SyncItem::directory("dir", Instruction::New, Direction::Down),
            new_file("dir/a"),
            new_file("dir/b"),
        ];
        let (tree, _) = build_tree(items);
        let root = tree.directory(tree.root);
        assert_eq!(root.sub.jobs_to_do.len(), 1);
        assert!(root.sub.tasks_to_do.is_empty());

        let dir_id = root.sub.jobs_to_do[0];
        let dir = tree.directory(dir_id);
        assert!(dir.first_job.is_some());
        assert_eq!(dir.sub.tasks_to_do.len(), 2);
    }

    #[test]
    fn removed_directory_absorbs_descendants_and_runs_last() {
        let items = vec![
            SyncItem::directory("dir", Instruction::Remove, Direction::Up),
            SyncItem::new("dir/a", Instruction::New, Direction::Up),
            SyncItem::new("dir/b", Instruction::Remove, Direction::Up),
        ];
        let (tree, _) = build_tree(items);
        let root = tree.directory(tree.root);
        // The removal is the only queued job and sits at the end.
        assert_eq!(root.sub.jobs_to_do.len(), 1);
        let removal = tree.directory(root.sub.jobs_to_do[0]);
        assert_eq!(removal.affected_count, 2);
        assert!(removal.sub.tasks_to_do.is_empty());
    }

    #[test]
    fn type_change_up_defers_the_subtree_to_the_next_sync() {
        let items = vec![
            SyncItem::directory("swap", Instruction::TypeChange, Direction::Up),
            SyncItem::new("swap/inner", Instruction::New, Direction::Up),
        ];
        let (tree, another_sync_needed) = build_tree(items);
        assert!(another_sync_needed);
        let root = tree.directory(tree.root);
        let dir = tree.directory(root.sub.jobs_to_do[0]);
        // The child was nulled; it stays queued but propagates nothing.
        assert_eq!(dir.sub.tasks_to_do.len(), 1);
        assert_eq!(dir.sub.tasks_to_do[0].instruction, Instruction::None);
    }

    #[test]
    fn update_metadata_ancestors_of_a_removal_are_nulled() {
        let items = vec![
            SyncItem::directory("parent", Instruction::UpdateMetadata, Direction::Down),
            SyncItem::directory("parent/gone", Instruction::Remove, Direction::Up),
        ];
        let (tree, _) = build_tree(items);
        let root = tree.directory(tree.root);
        let parent = tree.directory(root.sub.jobs_to_do[0]);
        assert_eq!(
            parent.item.as_ref().map(|i| i.instruction),
            Some(Instruction::None)
        );
    }

    #[test]
    fn useless_tasks_create_no_leaf() {
        let mut tree = JobTree::empty();
        let root = tree.root;
        assert!(create_task_leaf(
            &mut tree,
            root,
            SyncItem::new("x", Instruction::None, Direction::None)
        )
        .is_none());
        assert!(create_task_leaf(
            &mut tree,
            root,
            SyncItem::new("y", Instruction::New, Direction::Down)
        )
        .is_some());
    }
}
