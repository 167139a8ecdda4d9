//! Tests for the background indexing scheduler and the indexing pass.

use async_trait::async_trait;
use metarepo_index::MemoryIndex;
use metarepo_repository::{
    IndexingObserver, IndexingPassReport, IndexingScheduler, RepositoryConfig, RepositoryManager,
    Schedule,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn setup() -> (tempfile::TempDir, Arc<RepositoryManager>) {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig::new(dir.path());
    let manager = Arc::new(RepositoryManager::new(config, Arc::new(MemoryIndex::new())).unwrap());
    (dir, manager)
}

fn write_record(rm: &RepositoryManager, set: &str, id: &str, title: &str) {
    let dir = rm.set_info(set).unwrap().directory().to_path_buf();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{}.xml", id)),
        format!("<record><id>{}</id><title>{}</title></record>", id, title),
    )
    .unwrap();
}

struct CountingObserver {
    passes: AtomicUsize,
}

#[async_trait]
impl IndexingObserver for CountingObserver {
    async fn pass_completed(&self, _report: &IndexingPassReport) {
        self.passes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_indexing_pass_picks_up_new_files() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    write_record(&rm, "dcc", "REC-1", "One");
    write_record(&rm, "dcc", "REC-2", "Two");

    let token = CancellationToken::new();
    let report = rm.index_files(false, &token);
    assert_eq!(report.files_indexed, 2);
    assert!(!report.halted);
    assert!(rm.get_record("REC-1").is_some());
    assert!(rm.get_record("REC-2").is_some());

    // A second incremental pass skips unchanged files.
    let report = rm.index_files(false, &token);
    assert_eq!(report.files_indexed, 0);
    assert!(report.files_skipped >= 2);

    // A full pass reindexes everything.
    let report = rm.index_files(true, &token);
    assert!(report.files_indexed >= 2);
}

#[test]
fn test_indexing_pass_records_error_documents() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    write_record(&rm, "dcc", "REC-1", "Good");

    let dir = rm.set_info("dcc").unwrap().directory().to_path_buf();
    std::fs::write(dir.join("broken.xml"), "<record><id>oops</record>").unwrap();

    let token = CancellationToken::new();
    let report = rm.index_files(false, &token);

    // The pass continues past the bad record.
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(rm.num_indexing_errors(), 1);
    assert!(rm.get_record("REC-1").is_some());
}

#[test]
fn test_indexing_pass_prunes_removed_files() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    write_record(&rm, "dcc", "REC-1", "One");

    let token = CancellationToken::new();
    rm.index_files(false, &token);
    assert!(rm.get_record("REC-1").is_some());

    let dir = rm.set_info("dcc").unwrap().directory().to_path_buf();
    std::fs::remove_file(dir.join("REC-1.xml")).unwrap();

    let report = rm.index_files(false, &token);
    assert_eq!(report.files_removed, 1);
    assert!(rm.get_record("REC-1").is_none());
}

#[test]
fn test_cancelled_pass_halts_between_files() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    write_record(&rm, "dcc", "REC-1", "One");

    let token = CancellationToken::new();
    token.cancel();
    let report = rm.index_files(false, &token);
    assert!(report.halted);
    assert_eq!(report.files_indexed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_schedule_runs_passes() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    write_record(&rm, "dcc", "REC-1", "One");

    let observer = Arc::new(CountingObserver {
        passes: AtomicUsize::new(0),
    });

    let scheduler = IndexingScheduler::new(rm.clone());
    scheduler.start(
        Schedule::Interval(Duration::from_millis(100)),
        false,
        Some(observer.clone()),
    );
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(800)).await;
    scheduler.stop().await;

    assert!(observer.passes.load(Ordering::SeqCst) >= 1);
    assert!(rm.get_record("REC-1").is_some());
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_is_idempotent() {
    let (_dir, rm) = setup();
    let scheduler = IndexingScheduler::new(rm);

    // Stopping a never-started scheduler is a no-op.
    scheduler.stop().await;

    scheduler.start(Schedule::Interval(Duration::from_secs(60)), false, None);
    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_replaces_running_timer() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    let scheduler = IndexingScheduler::new(rm);
    scheduler.start(Schedule::Interval(Duration::from_secs(60)), false, None);
    scheduler.start(Schedule::Interval(Duration::from_secs(120)), true, None);
    assert!(scheduler.is_running());
    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_reloads_collection_records() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    // A descriptor dropped in by hand is discovered by the next firing.
    std::fs::write(
        rm.collection_records_dir().join("comet.xml"),
        "<collectionRecord>\n  <id>comet</id>\n  <key format=\"oai_dc\">comet</key>\n  \
         <title>COMET Modules</title>\n  <accessionStatus>accessioned</accessionStatus>\n\
         </collectionRecord>\n",
    )
    .unwrap();

    let scheduler = IndexingScheduler::new(rm.clone());
    scheduler.start(Schedule::Interval(Duration::from_millis(100)), false, None);
    tokio::time::sleep(Duration::from_millis(800)).await;
    scheduler.stop().await;

    assert!(rm.is_set_configured("comet"));
}
