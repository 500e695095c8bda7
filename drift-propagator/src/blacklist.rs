//! Error blacklist policy.
//!
//! Failing paths get an entry with an exponentially growing ignore window;
//! while the window is open, repeated failures are suppressed so one broken
//! file does not fail every run.

use tracing::{debug, info};

use drift_journal::{BlacklistEntry, SyncJournal};

use crate::config::PropagateConfig;
use crate::errors::Result;
use crate::item::SyncItem;

/// Marker prefixed to the error of a suppressed, recurring failure.
pub const CONTINUE_BLACKLISTING: &str = "Continue blacklisting:";

/// Recompute a blacklist entry from the previous one and the failed item.
///
/// Returns `None` when the failure is not worth tracking (no error text)
/// or the retry budget is exhausted; any existing entry is then deleted
/// rather than refreshed.
pub fn updated_entry(
    old: Option<&BlacklistEntry>,
    item: &SyncItem,
    now: i64,
    config: &PropagateConfig,
) -> Option<BlacklistEntry> {
    if item.error_string.is_empty() {
        return None;
    }
    let retry_count = old.map(|o| o.retry_count).unwrap_or(0) + 1;
    if retry_count > config.blacklist_max_retries {
        return None;
    }
    let ignore_duration = match old {
        None => config.blacklist_base_ignore,
        Some(old) => (old.ignore_duration * 2)
            .clamp(config.blacklist_base_ignore, config.blacklist_max_ignore),
    };
    Some(BlacklistEntry {
        file: item.file.clone(),
        last_try_etag: item.etag.clone(),
        last_try_modtime: item.modtime,
        last_try_time: now,
        retry_count,
        error_string: item.error_string.clone(),
        ignore_duration,
    })
}

/// Update, create or remove the blacklist entry for `item` after a failed
/// propagation. Returns whether the error should be suppressed.
pub fn blacklist_check(
    journal: &SyncJournal,
    item: &SyncItem,
    now: i64,
    config: &PropagateConfig,
) -> Result<bool> {
    let old = journal.blacklist_entry(&item.file)?;
    let entry = updated_entry(old.as_ref(), item, now, config);

    match &entry {
        Some(entry) => journal.update_blacklist_entry(entry)?,
        None => {
            if old.as_ref().is_some_and(|o| o.is_valid()) {
                debug!(file = %item.file, "dropping exhausted blacklist entry");
                journal.wipe_blacklist_entry(&item.file)?;
            }
        }
    }

    // Entries are sometimes kept for tracking without actively
    // suppressing anything.
    Ok(entry.is_some_and(|e| e.ignore_duration > 0))
}

/// Clear entries after a successful propagation, including the one left
/// under the pre-rename path.
pub fn wipe_after_success(journal: &SyncJournal, item: &SyncItem) -> Result<()> {
    if !item.has_blacklist_entry {
        return Ok(());
    }
    info!(file = %item.file, "clearing blacklist entry after success");
    journal.wipe_blacklist_entry(&item.file)?;
    if item.original_file != item.file {
        debug!(file = %item.original_file, "clearing blacklist entry under the old name");
        journal.wipe_blacklist_entry(&item.original_file)?;
    }
    Ok(())
}
