//! Restart behaviour: batches written by one manager are picked up by the next.

mod common;

use std::path::Path;
use std::sync::Arc;

use batchdl_core::config::BatchdlConfig;
use batchdl_core::persistence::{DownloadsPersistence, MemoryStore, SqliteStore};
use batchdl_core::testing::{pattern, FlakyPersistence, SimulatedFetcher};
use batchdl_core::{BatchRequest, BatchState, FileStatus, ManagerError};
use common::Harness;
use tempfile::tempdir;

#[tokio::test]
async fn sqlite_batch_is_rehydrated_and_completes() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("batchdl.db");
    let body = pattern(2_000);

    let first = Harness::new(SimulatedFetcher::new().with_chunk_size(100))
        .with_store(Arc::new(SqliteStore::open_at(&db).await.unwrap()));
    first.fetcher.add("sim://a", body.clone());
    first.fetcher.hold_at("sim://a", 800);
    let manager = first.manager(BatchdlConfig::default()).await;
    let id = manager
        .submit(
            BatchRequest::new("Restart", "/dl")
                .with_id("r1")
                .file("sim://a", "a.bin"),
        )
        .await
        .unwrap();
    first.fetcher.wait_held().await;
    manager.shutdown().await.unwrap();
    drop(manager);

    // Same on-disk data, fresh process state.
    let second = Harness {
        fetcher: Arc::new(SimulatedFetcher::new().with_chunk_size(100)),
        storage: Arc::clone(&first.storage),
        store: Arc::new(SqliteStore::open_at(&db).await.unwrap()),
        net: Arc::clone(&first.net),
    };
    second.fetcher.add("sim://a", body.clone());
    let manager = second.manager(BatchdlConfig::default()).await;
    manager.wait_until_idle().await.unwrap();

    let status = manager.status(&id).unwrap();
    assert_eq!(status.state, BatchState::Downloaded);
    assert_eq!(status.title, "Restart");
    assert_eq!(second.fetcher.bytes_served(), 1_200);
    assert_eq!(second.storage.contents(Path::new("/dl/a.bin")).unwrap(), body);
    let stored = second.store.load_batch(&id).await.unwrap().unwrap();
    assert_eq!(stored.status.state, BatchState::Downloaded);
    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn startup_recovers_interrupted_and_finishes_deleting() {
    let store = Arc::new(MemoryStore::new());

    let (status, mut files) = BatchRequest::new("Crashed", "/dl")
        .with_id("crashed")
        .file("sim://a", "a.bin")
        .into_records(1);
    files[0].status = FileStatus::Downloading;
    store.persist_batch(&status, &files).await.unwrap();

    let (status, mut files) = BatchRequest::new("Half deleted", "/dl2")
        .with_id("deleting")
        .file("sim://b", "b.bin")
        .into_records(2);
    files[0].status = FileStatus::Deleting;
    store.persist_batch(&status, &files).await.unwrap();

    let (status, mut files) = BatchRequest::new("Paused", "/dl3")
        .with_id("paused")
        .file("sim://c", "c.bin")
        .into_records(3);
    files[0].status = FileStatus::Paused;
    store.persist_batch(&status, &files).await.unwrap();

    let h = Harness::new(SimulatedFetcher::new()).with_store(Arc::clone(&store) as _);
    h.fetcher.add("sim://a", pattern(500));
    h.fetcher.add("sim://c", pattern(500));
    h.storage.put(Path::new("/dl2/b.bin"), pattern(10));
    let manager = h.manager(BatchdlConfig::default()).await;
    manager.wait_until_idle().await.unwrap();

    let statuses = manager.statuses();
    let ids: Vec<&str> = statuses.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["crashed", "paused"]);
    assert_eq!(statuses[0].state, BatchState::Downloaded);
    assert_eq!(statuses[1].state, BatchState::Paused);
    assert_eq!(h.fetcher.fetch_count("sim://c"), 0);

    // The interrupted delete finished but kept the data it could not vouch for.
    assert!(store.load_batch(&"deleting".into()).await.unwrap().is_none());
    assert!(h.storage.contents(Path::new("/dl2/b.bin")).is_some());
}

#[tokio::test(start_paused = true)]
async fn resume_on_start_can_be_disabled() {
    let store = Arc::new(MemoryStore::new());
    let (status, files) = BatchRequest::new("Later", "/dl")
        .with_id("later")
        .file("sim://a", "a.bin")
        .into_records(1);
    store.persist_batch(&status, &files).await.unwrap();

    let h = Harness::new(SimulatedFetcher::new()).with_store(Arc::clone(&store) as _);
    h.fetcher.add("sim://a", pattern(100));
    let manager = h
        .builder(BatchdlConfig::default())
        .resume_on_start(false)
        .build()
        .await
        .unwrap();
    manager.wait_until_idle().await.unwrap();
    assert_eq!(manager.status(&status.id).unwrap().state, BatchState::Queued);
    assert_eq!(h.fetcher.fetch_count("sim://a"), 0);

    manager.resume(&status.id).await.unwrap();
    manager.wait_until_idle().await.unwrap();
    assert_eq!(manager.status(&status.id).unwrap().state, BatchState::Downloaded);
}

#[tokio::test(start_paused = true)]
async fn restart_finishes_a_delete_whose_batch_record_survived() {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyPersistence::new(Arc::clone(&store) as _));
    let first = Harness::new(SimulatedFetcher::new()).with_store(Arc::clone(&flaky) as _);
    first.fetcher.add("sim://a", pattern(200));
    let manager = first.manager(BatchdlConfig::default()).await;
    let id = manager
        .submit(
            BatchRequest::new("Leftover", "/dl")
                .with_id("leftover")
                .file("sim://a", "a.bin"),
        )
        .await
        .unwrap();
    manager.wait_until_idle().await.unwrap();
    flaky.fail_next_batch_removals(1);
    assert_eq!(manager.delete(&id, true).await.unwrap().state, BatchState::Deleting);
    manager.shutdown().await.unwrap();
    drop(manager);

    // A batch row with no file rows left is an unfinished delete, not new work.
    let second = Harness::new(SimulatedFetcher::new()).with_store(Arc::clone(&store) as _);
    second.fetcher.add("sim://a", pattern(200));
    let manager = second.manager(BatchdlConfig::default()).await;
    manager.wait_until_idle().await.unwrap();
    assert!(matches!(manager.status(&id), Err(ManagerError::NotFound(_))));
    assert!(store.load_batch(&id).await.unwrap().is_none());
    assert_eq!(second.fetcher.fetch_count("sim://a"), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_a_delete_with_its_data_intent() {
    let store = Arc::new(MemoryStore::new());
    for (id, root, remove_files) in [("purge", "/dl1", true), ("forget", "/dl2", false)] {
        let (mut status, mut files) = BatchRequest::new(id, root)
            .with_id(id)
            .file("sim://x", "x.bin")
            .into_records(1);
        status.state = BatchState::Deleting;
        files[0].status = FileStatus::Deleting;
        store.mark_deleting(&status, &files, remove_files).await.unwrap();
    }

    let h = Harness::new(SimulatedFetcher::new()).with_store(Arc::clone(&store) as _);
    h.storage.put(Path::new("/dl1/x.bin"), pattern(10));
    h.storage.put(Path::new("/dl2/x.bin"), pattern(10));
    let manager = h.manager(BatchdlConfig::default()).await;
    manager.wait_until_idle().await.unwrap();

    assert!(manager.statuses().is_empty());
    assert!(store.load_batches().await.unwrap().is_empty());
    assert!(h.storage.contents(Path::new("/dl1/x.bin")).is_none());
    assert!(h.storage.contents(Path::new("/dl2/x.bin")).is_some());
}
