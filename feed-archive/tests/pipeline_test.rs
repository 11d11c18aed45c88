mod common;

use common::{descriptor, init_tracing, source, RecordingAcquirer};
use feed_archive::{ArchiveConfig, ArchiveError, Archiver, LedgerStore, LedgerView, MemorySink};
use interfaces::StaticListing;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn test_config(root: &Path) -> ArchiveConfig {
    let mut config = ArchiveConfig {
        root: root.to_path_buf(),
        sync_limit: 3,
        sources: vec![source("ch1", "Channel One"), source("ch2", "Channel Two")],
        ..Default::default()
    };
    config.acquisition.retry_delay_seconds = 0;
    config.acquisition.max_attempts = 3;
    config
}

fn build_archiver(root: &Path, listing: StaticListing, acquirer: Arc<RecordingAcquirer>) -> Archiver {
    let config = test_config(root);
    let ledger = LedgerStore::open(root).unwrap();
    Archiver::new(config, ledger, Arc::new(listing), acquirer)
}

fn ch1_listing() -> StaticListing {
    StaticListing::new().with_listing(
        "ch1",
        vec![
            descriptor("v4", "2024-01-04T00:00:00Z"),
            descriptor("v3", "2024-01-03T00:00:00Z"),
            descriptor("v2", "2024-01-02T00:00:00Z"),
            descriptor("v1", "2024-01-01T00:00:00Z"),
        ],
    )
}

#[tokio::test]
async fn test_sync_records_new_items_up_to_limit() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let acquirer = Arc::new(RecordingAcquirer::new());
    let mut archiver = build_archiver(dir.path(), ch1_listing(), acquirer.clone());

    let report = archiver.sync_source(&source("ch1", "Channel One")).await.unwrap();
    info!("Sync report: {:?}", report);
    assert_eq!(report.listed, 4);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.recorded, 3);
    assert!(report.failed.is_empty());

    let ledger = archiver.ledger();
    assert!(ledger.has("v4") && ledger.has("v3") && ledger.has("v2"));
    assert!(!ledger.has("v1"));

    let v4 = ledger.get("v4").unwrap();
    assert_eq!(v4.local_path, "ch1/v4.m4a");
    assert_eq!(v4.duration_seconds, Some(61));
    assert_eq!(v4.description.as_deref(), Some("About v4"));
    assert!(ledger.resolve(v4).exists());
}

#[tokio::test]
async fn test_recorded_items_are_never_acquired_again() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let acquirer = Arc::new(RecordingAcquirer::new());
    let mut archiver = build_archiver(dir.path(), ch1_listing(), acquirer.clone());
    let ch1 = source("ch1", "Channel One");

    archiver.sync_source(&ch1).await.unwrap();
    let second = archiver.sync_source(&ch1).await.unwrap();
    assert_eq!(second.new_items, 1);
    assert_eq!(second.recorded, 1);
    let third = archiver.sync_source(&ch1).await.unwrap();
    assert_eq!(third.new_items, 0);

    for id in ["v1", "v2", "v3", "v4"] {
        assert_eq!(acquirer.calls(id), 1, "{} acquired more than once", id);
    }

    // A fresh process over the same root agrees.
    archiver.into_ledger().close();
    let acquirer = Arc::new(RecordingAcquirer::new());
    let mut restarted = build_archiver(dir.path(), ch1_listing(), acquirer.clone());
    let report = restarted.sync_source(&ch1).await.unwrap();
    assert_eq!(report.new_items, 0);
    assert_eq!(acquirer.total_calls(), 0);
}

#[tokio::test]
async fn test_failed_item_does_not_abort_batch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let acquirer = Arc::new(RecordingAcquirer::new().failing("v3"));
    let mut archiver = build_archiver(dir.path(), ch1_listing(), acquirer.clone());

    let report = archiver.sync_source(&source("ch1", "Channel One")).await.unwrap();
    assert_eq!(report.recorded, 2);
    assert_eq!(report.failed, vec!["v3".to_string()]);
    assert_eq!(acquirer.calls("v3"), 3);
    assert!(!archiver.ledger().has("v3"));

    // The failed item is still new on the next run.
    let again = archiver.sync_source(&source("ch1", "Channel One")).await.unwrap();
    assert_eq!(again.failed, vec!["v3".to_string()]);
    assert_eq!(again.recorded, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let acquirer = Arc::new(RecordingAcquirer::new().flaky("v4", 2));
    let mut archiver = build_archiver(dir.path(), ch1_listing(), acquirer.clone());

    let report = archiver.sync_source(&source("ch1", "Channel One")).await.unwrap();
    assert_eq!(report.recorded, 3);
    assert_eq!(acquirer.calls("v4"), 3);
    assert!(archiver.ledger().has("v4"));
}

#[tokio::test]
async fn test_sync_all_isolates_listing_failures() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let acquirer = Arc::new(RecordingAcquirer::new());
    // ch2 has no listing, which the static collaborator reports as an error.
    let mut archiver = build_archiver(dir.path(), ch1_listing(), acquirer);

    let report = archiver.sync_all().await.unwrap();
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.recorded(), 3);
    assert_eq!(report.failed_sources.len(), 1);
    assert_eq!(report.failed_sources[0].0, "ch2");

    let err = archiver.sync_source(&source("ch2", "Channel Two")).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Listing { .. }));
}

#[tokio::test]
async fn test_sync_one_rejects_unconfigured_source() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut archiver = build_archiver(dir.path(), ch1_listing(), Arc::new(RecordingAcquirer::new()));

    let err = archiver.sync_one("nope").await.unwrap_err();
    assert!(matches!(err, ArchiveError::UnknownSourceReference(_)));
    assert_eq!(archiver.sync_one("ch1").await.unwrap().recorded, 3);
}

#[tokio::test]
async fn test_run_syncs_then_builds_feeds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let listing = ch1_listing().with_listing("ch2", vec![descriptor("w1", "2024-01-05T00:00:00Z")]);
    let mut archiver = build_archiver(dir.path(), listing, Arc::new(RecordingAcquirer::new()));

    let mut sink = MemorySink::default();
    let (sync, build) = archiver.run(&mut sink).await.unwrap();
    assert_eq!(sync.recorded(), 4);
    assert_eq!(
        build.written,
        vec!["ch1.xml".to_string(), "ch2.xml".to_string(), "all.xml".to_string()]
    );

    let all = String::from_utf8(sink.documents["all.xml"].clone()).unwrap();
    let newest = all.find("<guid isPermaLink=\"false\">w1</guid>").unwrap();
    let next = all.find("<guid isPermaLink=\"false\">v4</guid>").unwrap();
    assert!(newest < next);
    assert!(all.contains("ch1/v4.m4a"));
}
