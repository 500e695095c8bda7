//! The per-path unit of work handed to the propagator.

use serde::{Deserialize, Serialize};

use drift_journal::{EntryType, FileRecord};

/// What should happen to a path, decided by the reconciler upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    None,
    UpdateMetadata,
    New,
    Rename,
    Sync,
    Conflict,
    Remove,
    TypeChange,
    Ignore,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    None,
    Up,
    Down,
}

/// Terminal state of one item after propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    NoStatus,
    FatalError,
    NormalError,
    SoftError,
    Success,
    Conflict,
    FileIgnored,
    /// The item was recovered after being removed from a read-only share.
    Restoration,
}

impl ItemStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ItemStatus::FatalError | ItemStatus::NormalError | ItemStatus::SoftError
        )
    }

    /// Errors that fail the surrounding composite. Soft errors do not: an
    /// aborted run is expected to finish cleanly and retry next time.
    pub fn fails_composite(self) -> bool {
        matches!(self, ItemStatus::FatalError | ItemStatus::NormalError)
    }

    /// The more severe of two statuses, for composite bookkeeping.
    pub fn worst(self, other: ItemStatus) -> ItemStatus {
        let rank = |s: ItemStatus| match s {
            ItemStatus::FatalError => 3,
            ItemStatus::NormalError => 2,
            ItemStatus::SoftError => 1,
            _ => 0,
        };
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

/// One path's desired change, shared between the propagator, the job that
/// executes it and the progress listener. Nothing mutates an item after its
/// terminal status is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub file: String,
    /// Path before a detected rename; equals `file` otherwise.
    pub original_file: String,
    /// Destination of a rename; empty when not renaming.
    pub rename_target: String,
    pub instruction: Instruction,
    pub direction: Direction,
    pub is_directory: bool,
    pub size: i64,
    /// Seconds since the epoch.
    pub modtime: i64,
    pub etag: String,
    pub file_id: String,
    pub remote_perm: Option<String>,
    pub mode: i32,
    pub inode: i64,
    pub is_restoration: bool,
    /// Set by the producer when the journal already blacklists this path.
    pub has_blacklist_entry: bool,
    /// Allow blacklisting even for soft and fatal errors.
    pub error_may_be_blacklisted: bool,
    pub status: ItemStatus,
    pub error_string: String,
}

impl SyncItem {
    pub fn new(file: impl Into<String>, instruction: Instruction, direction: Direction) -> Self {
        let file = file.into();
        Self {
            original_file: file.clone(),
            file,
            rename_target: String::new(),
            instruction,
            direction,
            is_directory: false,
            size: 0,
            modtime: 0,
            etag: String::new(),
            file_id: String::new(),
            remote_perm: None,
            mode: 0,
            inode: 0,
            is_restoration: false,
            has_blacklist_entry: false,
            error_may_be_blacklisted: false,
            status: ItemStatus::NoStatus,
            error_string: String::new(),
        }
    }

    pub fn directory(
        file: impl Into<String>,
        instruction: Instruction,
        direction: Direction,
    ) -> Self {
        let mut item = Self::new(file, instruction, direction);
        item.is_directory = true;
        item
    }

    /// Where the item ends up after this run.
    pub fn destination(&self) -> &str {
        if self.rename_target.is_empty() {
            &self.file
        } else {
            &self.rename_target
        }
    }

    pub fn to_file_record(&self) -> FileRecord {
        FileRecord {
            path: self.file.clone(),
            inode: self.inode,
            mode: self.mode,
            modtime: self.modtime,
            kind: if self.is_directory {
                EntryType::Directory
            } else {
                EntryType::File
            },
            etag: self.etag.clone(),
            file_id: self.file_id.clone(),
            remote_perm: self.remote_perm.clone(),
            file_size: self.size,
        }
    }

    pub fn from_record(record: &FileRecord) -> Self {
        let mut item = Self::new(record.path.clone(), Instruction::None, Direction::Up);
        item.is_directory = record.kind == EntryType::Directory;
        item.size = record.file_size;
        item.modtime = record.modtime;
        item.etag = record.etag.clone();
        item.file_id = record.file_id.clone();
        item.remote_perm = record.remote_perm.clone();
        item.mode = record.mode;
        item.inode = record.inode;
        item
    }
}
