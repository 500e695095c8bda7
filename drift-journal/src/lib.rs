//! Persistent sync journal for the driftsync propagation engine.
//!
//! One `.csync_journal.db` SQLite file per synchronized folder records the
//! last propagated state of every path, partial-transfer checkpoints for
//! resume, an error blacklist with an exponentially growing ignore window,
//! and pending server-side continuations.

pub mod errors;
pub mod fs;
pub mod journal;
pub mod phash;
pub mod records;
pub mod sql;

pub use errors::{JournalError, Result};
pub use journal::{JournalOptions, SyncJournal, INVALID_ETAG, JOURNAL_FILE_NAME};
pub use phash::PathHash;
pub use records::{BlacklistEntry, DownloadInfo, EntryType, FileRecord, PollInfo, UploadInfo};
