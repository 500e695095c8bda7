//! End-to-end scenarios over a real journal and a scripted transfer
//! engine: plain downloads, directory removal absorption, blacklist
//! suppression across runs, shared-folder restoration and poll cleanup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use driftsync::journal::{JournalOptions, PollInfo, SyncJournal};
use driftsync::propagator::{
    cleanup_polls, Direction, Instruction, ItemStatus, LeafContext, LeafOutcome, PropagateConfig,
    PropagatorEvent, Propagator, SyncItem, TransferEngine,
};

#[derive(Default)]
struct ScriptedEngine {
    outcomes: Mutex<HashMap<String, Vec<LeafOutcome>>>,
    calls: Mutex<Vec<(String, Instruction, Direction)>>,
    poll_outcome: Mutex<Option<LeafOutcome>>,
}

impl ScriptedEngine {
    fn script(&self, file: &str, outcome: LeafOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(file.to_string())
            .or_default()
            .push(outcome);
    }

    fn calls(&self) -> Vec<(String, Instruction, Direction)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferEngine for ScriptedEngine {
    async fn execute(&self, item: SyncItem, _ctx: LeafContext) -> LeafOutcome {
        self.calls.lock().unwrap().push((
            item.destination().to_string(),
            item.instruction,
            item.direction,
        ));
        self.outcomes
            .lock()
            .unwrap()
            .get_mut(item.destination())
            .and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
            .unwrap_or_else(LeafOutcome::success)
    }

    async fn poll(&self, _info: PollInfo, _item: SyncItem, _ctx: LeafContext) -> LeafOutcome {
        self.poll_outcome
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(LeafOutcome::success)
    }
}

struct Harness {
    _dir: TempDir,
    journal: Arc<SyncJournal>,
    engine: Arc<ScriptedEngine>,
    local: std::path::PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(SyncJournal::new(
            dir.path(),
            JournalOptions {
                case_preserving: false,
            },
        ));
        let local = dir.path().to_path_buf();
        Self {
            _dir: dir,
            journal,
            engine: Arc::new(ScriptedEngine::default()),
            local,
        }
    }

    fn propagator(&self, remote_folder: &str) -> (Propagator, mpsc::UnboundedReceiver<PropagatorEvent>) {
        let mut propagator = Propagator::new(
            PropagateConfig::default(),
            self.journal.clone(),
            self.engine.clone(),
            &self.local,
            remote_folder,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        propagator.set_event_sender(tx);
        (propagator, rx)
    }
}

fn completed_items(events: &mut mpsc::UnboundedReceiver<PropagatorEvent>) -> Vec<SyncItem> {
    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PropagatorEvent::ItemCompleted { item } = event {
            completed.push(item);
        }
    }
    completed
}

fn download(file: &str, size: i64) -> SyncItem {
    let mut item = SyncItem::new(file, Instruction::New, Direction::Down);
    item.size = size;
    item.etag = format!("etag-{file}");
    item.modtime = 1_700_000_000;
    item
}

#[tokio::test]
async fn fresh_folder_with_three_downloads() {
    let harness = Harness::new();
    let (propagator, mut events) = harness.propagator("");

    let items = vec![download("a", 100), download("b", 100), download("c", 100)];
    let report = propagator.run(items).await.unwrap();

    assert_eq!(report.status, ItemStatus::Success);
    assert!(!report.another_sync_needed);

    let journal = &harness.journal;
    assert_eq!(journal.file_record_count().unwrap(), 3);
    for file in ["a", "b", "c"] {
        assert!(journal.get_file_record(file).unwrap().is_some());
    }
    assert_eq!(journal.blacklist_entry_count().unwrap(), 0);
    assert_eq!(journal.download_info_count().unwrap(), 0);

    let completed = completed_items(&mut events);
    assert_eq!(completed.len(), 3);
    assert!(completed.iter().all(|i| i.status == ItemStatus::Success));
}

#[tokio::test]
async fn removing_a_directory_absorbs_its_descendants() {
    let harness = Harness::new();

    // State from the previous run: the tree is known to the journal.
    for item in [
        {
            let mut d = SyncItem::directory("dir", Instruction::None, Direction::None);
            d.etag = "etag-dir".to_string();
            d
        },
        download("dir/a", 10),
        download("dir/b", 10),
    ] {
        harness.journal.set_file_record(&item.to_file_record()).unwrap();
    }
    assert_eq!(harness.journal.file_record_count().unwrap(), 3);

    let items = vec![
        SyncItem::directory("dir", Instruction::Remove, Direction::Up),
        SyncItem::new("dir/a", Instruction::New, Direction::Up),
        SyncItem::new("dir/b", Instruction::Remove, Direction::Up),
    ];
    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(items).await.unwrap();

    assert_eq!(report.status, ItemStatus::Success);
    assert_eq!(report.affected_counts.get("dir"), Some(&2));

    // Only the directory removal itself reached the engine.
    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "dir");
    assert_eq!(calls[0].1, Instruction::Remove);

    // The recursive delete wiped the whole subtree from the journal.
    assert_eq!(harness.journal.file_record_count().unwrap(), 0);

    let completed = completed_items(&mut events);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].file, "dir");
}

#[tokio::test]
async fn blacklist_suppresses_the_second_failure() {
    let harness = Harness::new();

    // First run: the upload fails normally and gets blacklisted.
    harness.engine.script(
        "flaky.txt",
        LeafOutcome::error(ItemStatus::NormalError, "server said no"),
    );
    let mut item = SyncItem::new("flaky.txt", Instruction::Sync, Direction::Up);
    item.etag = "etag-1".to_string();
    item.modtime = 1_700_000_000;

    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(vec![item.clone()]).await.unwrap();
    assert_eq!(report.status, ItemStatus::NormalError);

    let completed = completed_items(&mut events);
    assert_eq!(completed[0].status, ItemStatus::NormalError);

    let entry = harness
        .journal
        .blacklist_entry("flaky.txt")
        .unwrap()
        .expect("entry created on first failure");
    assert_eq!(entry.retry_count, 1);
    assert!(entry.ignore_duration > 0);
    assert_eq!(entry.error_string, "server said no");

    // Second run: the producer saw the blacklist entry; the repeated
    // failure is suppressed instead of reported again.
    harness.engine.script(
        "flaky.txt",
        LeafOutcome::error(ItemStatus::NormalError, "server said no"),
    );
    item.has_blacklist_entry = true;
    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(vec![item]).await.unwrap();

    assert_eq!(report.status, ItemStatus::Success);
    let completed = completed_items(&mut events);
    assert_eq!(completed[0].status, ItemStatus::FileIgnored);
    assert!(completed[0].error_string.starts_with("Continue blacklisting:"));

    let entry = harness.journal.blacklist_entry("flaky.txt").unwrap().unwrap();
    assert_eq!(entry.retry_count, 2);
}

#[tokio::test]
async fn success_wipes_the_blacklist_entry() {
    let harness = Harness::new();
    harness.engine.script(
        "healed.txt",
        LeafOutcome::error(ItemStatus::NormalError, "transient"),
    );
    let mut item = SyncItem::new("healed.txt", Instruction::Sync, Direction::Up);
    item.modtime = 1;

    let (propagator, _events) = harness.propagator("");
    propagator.run(vec![item.clone()]).await.unwrap();
    assert!(harness.journal.blacklist_entry("healed.txt").unwrap().is_some());

    item.has_blacklist_entry = true;
    let (propagator, _events) = harness.propagator("");
    let report = propagator.run(vec![item]).await.unwrap();
    assert_eq!(report.status, ItemStatus::Success);
    assert!(harness.journal.blacklist_entry("healed.txt").unwrap().is_none());
}

#[tokio::test]
async fn forbidden_write_in_a_share_is_restored_as_conflict() {
    let harness = Harness::new();

    // The upload is refused; the compensating download succeeds.
    harness.engine.script(
        "Shared/doc.txt",
        LeafOutcome::http_error(ItemStatus::NormalError, 403, "Forbidden"),
    );
    harness.engine.script("Shared/doc.txt", LeafOutcome::success());

    let mut item = SyncItem::new("Shared/doc.txt", Instruction::Sync, Direction::Up);
    item.size = 42;
    item.modtime = 1_700_000_000;

    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(vec![item]).await.unwrap();

    // The original operation did fail, but only softly.
    assert_eq!(report.status, ItemStatus::Success);
    let completed = completed_items(&mut events);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, ItemStatus::SoftError);
    assert_eq!(completed[0].error_string, "Forbidden");

    // The compensating job ran as a conflict download.
    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], (
        "Shared/doc.txt".to_string(),
        Instruction::Conflict,
        Direction::Down,
    ));
}

#[tokio::test]
async fn forbidden_directory_removal_requests_another_sync() {
    let harness = Harness::new();

    harness.journal
        .set_file_record(
            &SyncItem::directory("Shared/album", Instruction::None, Direction::None)
                .to_file_record(),
        )
        .unwrap();

    harness.engine.script(
        "Shared/album",
        LeafOutcome::http_error(ItemStatus::NormalError, 403, "Forbidden"),
    );
    harness.engine.script("Shared/album", LeafOutcome::success());

    let item = SyncItem::directory("Shared/album", Instruction::Remove, Direction::Down);
    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(vec![item]).await.unwrap();

    assert!(report.another_sync_needed);
    let completed = completed_items(&mut events);
    assert_eq!(completed[0].status, ItemStatus::SoftError);

    // The local mkdir compensation went through the engine.
    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, Instruction::New);
    assert_eq!(calls[1].2, Direction::Down);
}

#[tokio::test]
async fn new_files_in_a_share_are_not_restored() {
    let harness = Harness::new();
    harness.engine.script(
        "Shared/fresh.txt",
        LeafOutcome::http_error(ItemStatus::NormalError, 403, "Forbidden"),
    );

    let item = SyncItem::new("Shared/fresh.txt", Instruction::New, Direction::Up);
    let (propagator, mut events) = harness.propagator("");
    let report = propagator.run(vec![item]).await.unwrap();

    // No compensation possible: the error goes through unchanged.
    assert_eq!(report.status, ItemStatus::NormalError);
    assert_eq!(harness.engine.calls().len(), 1);
    let completed = completed_items(&mut events);
    assert_eq!(completed[0].status, ItemStatus::NormalError);
}

#[tokio::test]
async fn poll_cleanup_settles_finished_continuations() {
    let harness = Harness::new();

    let mut uploaded = download("assembling.bin", 1 << 20);
    uploaded.etag = "etag-old".to_string();
    harness.journal.set_file_record(&uploaded.to_file_record()).unwrap();
    harness.journal
        .set_poll_info(&PollInfo {
            file: "assembling.bin".to_string(),
            modtime: 1_700_000_000,
            url: "remote.php/poll/42".to_string(),
        })
        .unwrap();

    *harness.engine.poll_outcome.lock().unwrap() = Some(LeafOutcome {
        status: Some(ItemStatus::Success),
        etag: Some("etag-assembled".to_string()),
        ..Default::default()
    });

    cleanup_polls(
        &harness.journal,
        harness.engine.as_ref(),
        &PropagateConfig::default(),
    )
    .await
    .unwrap();

    assert!(harness.journal.get_poll_infos().unwrap().is_empty());
    assert_eq!(
        harness.journal
            .get_file_record("assembling.bin")
            .unwrap()
            .unwrap()
            .etag,
        "etag-assembled"
    );
}

#[tokio::test]
async fn post_sync_cleanup_drops_rows_outside_the_keep_set() {
    let harness = Harness::new();
    let (propagator, _events) = harness.propagator("");
    let items = vec![download("keep.txt", 10), download("stale.txt", 10)];
    propagator.run(items).await.unwrap();
    assert_eq!(harness.journal.file_record_count().unwrap(), 2);

    let keep: HashSet<String> = ["keep.txt".to_string()].into_iter().collect();
    harness.journal.post_sync_cleanup(&keep).unwrap();
    harness.journal.delete_stale_upload_infos(&keep).unwrap();
    harness.journal.delete_stale_blacklist_entries(&keep).unwrap();
    let stale_downloads = harness
        .journal
        .get_and_delete_stale_download_infos(&keep)
        .unwrap();

    assert!(stale_downloads.is_empty());
    assert_eq!(harness.journal.file_record_count().unwrap(), 1);
    assert!(harness.journal.get_file_record("keep.txt").unwrap().is_some());
}
