//! Recovery of items the server refused inside a shared directory.
//!
//! Deleting or overwriting inside a read-only share comes back as HTTP 403.
//! Instead of failing the item outright, a compensating job pulls the
//! server state back (or re-creates the directory locally) so the local
//! tree converges again.

use tracing::{info, warn};

use crate::item::{Direction, Instruction, ItemStatus, SyncItem};

/// Heuristic for servers that expose no permission bits: either the whole
/// sync is of a share, or shares live under the top-level `Shared` folder.
pub fn is_in_shared_directory(remote_folder: &str, file: &str) -> bool {
    remote_folder.starts_with("Shared")
        || file == "Shared"
        || file.starts_with("Shared/")
}

/// What to run instead after a 403 on `item`, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    /// Pull the server version back down (or re-create the directory).
    Restore {
        item: SyncItem,
        /// A directory restore needs the rename detector disabled for the
        /// path and another sync pass afterwards.
        needs_another_sync: bool,
    },
    /// Nothing can be restored; fail the item normally.
    GiveUp,
}

/// Decide the compensating action for an item rejected with 403 inside
/// shared territory. `now` stamps conflicts whose server mtime is unknown
/// at this point.
pub fn compensation_for(item: &SyncItem, now: i64) -> Compensation {
    if !item.is_directory {
        let mut restore = item.clone();
        match item.instruction {
            // Pushing something that never existed on the server cannot be
            // recovered by pulling it back.
            Instruction::New | Instruction::TypeChange => return Compensation::GiveUp,
            Instruction::Sync => {
                // Locally modified: keep both sides as a conflict. The
                // server mtime is unknown here, so stamp the current time.
                restore.instruction = Instruction::Conflict;
                restore.modtime = now;
            }
            _ => {
                // Removed or renamed: recover the old server version.
                restore.instruction = Instruction::Sync;
            }
        }
        restore.direction = Direction::Down;
        info!(file = %item.file, "restoring file refused by a read-only share");
        Compensation::Restore {
            item: restore,
            needs_another_sync: false,
        }
    } else {
        // Directories are harder to recover. Re-create the directory
        // locally; the next sync pass recovers the files within.
        let mut restore = item.clone();
        restore.instruction = Instruction::New;
        restore.direction = Direction::Down;
        warn!(file = %item.file, "re-creating directory removed from a read-only share");
        Compensation::Restore {
            item: restore,
            needs_another_sync: true,
        }
    }
}

/// Map the outcome of the compensating job back onto the original item.
/// The original operation did fail; a successful restoration is reported
/// as a soft error carrying the restoration message.
pub fn map_restore_outcome(status: ItemStatus, message: &str) -> (ItemStatus, String) {
    match status {
        ItemStatus::Success | ItemStatus::Conflict | ItemStatus::Restoration => {
            (ItemStatus::SoftError, message.to_string())
        }
        other => (
            other,
            format!(
                "A file or folder was removed from a read only share, but restoring failed: {}",
                message
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_heuristic_matches_share_roots_and_prefixes() {
        assert!(is_in_shared_directory("Shared", "anything"));
        assert!(is_in_shared_directory("Shared/photos", "x"));
        assert!(is_in_shared_directory("", "Shared"));
        assert!(is_in_shared_directory("", "Shared/doc.txt"));
        assert!(!is_in_shared_directory("", "NotShared/doc.txt"));
    }

    #[test]
    fn new_files_cannot_be_restored() {
        let item = SyncItem::new("Shared/new.txt", Instruction::New, Direction::Up);
        assert_eq!(compensation_for(&item, 9), Compensation::GiveUp);
    }

    #[test]
    fn local_modifications_become_conflicts_stamped_now() {
        let item = SyncItem::new("Shared/doc.txt", Instruction::Sync, Direction::Up);
        match compensation_for(&item, 1_234) {
            Compensation::Restore {
                item: restore,
                needs_another_sync,
            } => {
                assert_eq!(restore.instruction, Instruction::Conflict);
                assert_eq!(restore.direction, Direction::Down);
                assert_eq!(restore.modtime, 1_234);
                assert!(!needs_another_sync);
            }
            other => panic!("unexpected compensation: {:?}", other),
        }
    }

    #[test]
    fn removals_pull_the_server_version_back() {
        let item = SyncItem::new("Shared/doc.txt", Instruction::Remove, Direction::Up);
        match compensation_for(&item, 0) {
            Compensation::Restore { item: restore, .. } => {
                assert_eq!(restore.instruction, Instruction::Sync);
                assert_eq!(restore.direction, Direction::Down);
            }
            other => panic!("unexpected compensation: {:?}", other),
        }
    }

    #[test]
    fn directory_restores_request_another_sync() {
        let item = SyncItem::directory("Shared/dir", Instruction::Remove, Direction::Up);
        match compensation_for(&item, 0) {
            Compensation::Restore {
                item: restore,
                needs_another_sync,
            } => {
                assert_eq!(restore.instruction, Instruction::New);
                assert_eq!(restore.direction, Direction::Down);
                assert!(needs_another_sync);
            }
            other => panic!("unexpected compensation: {:?}", other),
        }
    }

    #[test]
    fn restoration_outcomes_map_to_soft_errors() {
        let (status, message) = map_restore_outcome(ItemStatus::Success, "was removed");
        assert_eq!(status, ItemStatus::SoftError);
        assert_eq!(message, "was removed");

        let (status, message) = map_restore_outcome(ItemStatus::NormalError, "boom");
        assert_eq!(status, ItemStatus::NormalError);
        assert!(message.contains("restoring failed"));
    }
}
