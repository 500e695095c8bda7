//! Row types of the five journal stores.

use serde::{Deserialize, Serialize};

/// File-type discriminant persisted in the metadata table.
///
/// The numeric values are part of the on-disk format; directory entries are
/// matched by value in the etag-invalidation UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum EntryType {
    File = 0,
    Symlink = 1,
    Directory = 2,
}

impl EntryType {
    pub fn from_i64(value: i64) -> EntryType {
        match value {
            2 => EntryType::Directory,
            1 => EntryType::Symlink,
            _ => EntryType::File,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Last known synchronized state of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub inode: i64,
    /// POSIX mode bits, advisory only.
    pub mode: i32,
    /// Seconds since the epoch.
    pub modtime: i64,
    pub kind: EntryType,
    /// Server version token; the literal `_invalid_` forces a refresh.
    pub etag: String,
    /// Stable server identifier across renames.
    pub file_id: String,
    /// Opaque permission token; `None` is stored as SQL NULL.
    pub remote_perm: Option<String>,
    pub file_size: i64,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryType::Directory
    }
}

/// Resume checkpoint for a partially downloaded file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub tmpfile: String,
    pub etag: String,
    pub error_count: i32,
    /// Writing an invalid checkpoint deletes the row instead.
    pub valid: bool,
}

/// Resume checkpoint for a partially uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadInfo {
    pub chunk: i64,
    pub transfer_id: i64,
    pub error_count: i32,
    pub size: i64,
    /// Seconds since the epoch.
    pub modtime: i64,
    pub valid: bool,
}

/// One row of the error blacklist.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub file: String,
    pub last_try_etag: String,
    pub last_try_modtime: i64,
    /// Seconds since the epoch of the last attempt.
    pub last_try_time: i64,
    pub retry_count: i32,
    pub error_string: String,
    /// Seconds the path stays suppressed; 0 keeps the row for history only.
    pub ignore_duration: i64,
}

impl BlacklistEntry {
    pub fn is_valid(&self) -> bool {
        !self.file.is_empty() && self.last_try_time > 0
    }

    /// Whether this entry actively suppresses its path right now.
    pub fn suppresses(&self, now: i64) -> bool {
        self.is_valid()
            && self.ignore_duration > 0
            && now < self.last_try_time + self.ignore_duration
    }
}

/// Outstanding asynchronous server-side job continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollInfo {
    pub file: String,
    /// Seconds since the epoch.
    pub modtime: i64,
    /// Continuation URL; an empty url deletes the row.
    pub url: String,
}
