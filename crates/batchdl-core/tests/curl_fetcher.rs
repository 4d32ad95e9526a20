//! CurlFetcher against a local range-capable HTTP server.

mod common;

use std::sync::Arc;

use batchdl_core::network::{ByteStream, CurlFetcher, CurlOptions, FetchResponse, FileFetcher};
use batchdl_core::persistence::MemoryStore;
use batchdl_core::storage::LocalStorage;
use batchdl_core::testing::pattern;
use batchdl_core::{BatchRequest, BatchState, DownloadManager, FileSize, NetworkErrorKind};
use common::range_server::{self, ServerOptions};
use tempfile::tempdir;

async fn read_all(mut response: FetchResponse) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = response.stream.next_chunk().await.expect("chunk") {
        out.extend_from_slice(&chunk);
    }
    out
}

fn fetcher() -> CurlFetcher {
    CurlFetcher::new(CurlOptions::default())
}

#[tokio::test]
async fn probe_reports_content_length() {
    let url = range_server::start(pattern(4096));
    let size = fetcher().probe_size(&url).await.unwrap();
    assert_eq!(size, FileSize::Known(4096));
}

#[tokio::test]
async fn probe_blocked_head_leaves_size_unknown() {
    let url = range_server::start_with_options(
        pattern(100),
        ServerOptions {
            head_allowed: false,
            ..ServerOptions::default()
        },
    );
    assert_eq!(fetcher().probe_size(&url).await.unwrap(), FileSize::Unknown);
}

#[tokio::test]
async fn fetch_from_offset_serves_tail() {
    let body = pattern(10_000);
    let url = range_server::start(body.clone());
    let response = fetcher().fetch(&url, Some(6_000)).await.unwrap();
    assert_eq!(response.start_offset, 6_000);
    assert_eq!(response.total_size, Some(10_000));
    assert_eq!(read_all(response).await, body[6_000..].to_vec());
}

#[tokio::test]
async fn ignored_range_restarts_at_zero() {
    let body = pattern(2_000);
    let url = range_server::start_with_options(
        body.clone(),
        ServerOptions {
            support_ranges: false,
            ..ServerOptions::default()
        },
    );
    let response = fetcher().fetch(&url, Some(500)).await.unwrap();
    assert_eq!(response.start_offset, 0);
    assert_eq!(read_all(response).await, body);
}

#[tokio::test]
async fn http_errors_are_classified() {
    let gone = range_server::start_with_options(
        pattern(10),
        ServerOptions {
            fail_status: Some(404),
            ..ServerOptions::default()
        },
    );
    let err = fetcher().fetch(&gone, None).await.unwrap_err();
    assert_eq!(err.kind, NetworkErrorKind::PermanentResource);
    assert_eq!(err.status, Some(404));

    let busy = range_server::start_with_options(
        pattern(10),
        ServerOptions {
            fail_status: Some(503),
            ..ServerOptions::default()
        },
    );
    let err = fetcher().probe_size(&busy).await.unwrap_err();
    assert_eq!(err.kind, NetworkErrorKind::Throttled);
}

#[tokio::test]
async fn unsupported_scheme_is_rejected() {
    let err = fetcher().fetch("ftp://example.com/a", None).await.unwrap_err();
    assert_eq!(err.kind, NetworkErrorKind::UnsupportedAddress);
}

#[tokio::test]
async fn manager_downloads_over_http_to_disk() {
    let body = pattern(64 * 1024);
    let url = range_server::start(body.clone());
    let dir = tempdir().unwrap();

    let manager = DownloadManager::builder()
        .fetcher(Arc::new(fetcher()))
        .storage(Arc::new(LocalStorage::new()))
        .persistence(Arc::new(MemoryStore::new()))
        .build()
        .await
        .unwrap();
    let id = manager
        .submit(
            BatchRequest::new("http", dir.path())
                .file(format!("{url}a.bin"), "a.bin")
                .file(format!("{url}b.bin"), "nested/b.bin"),
        )
        .await
        .unwrap();
    manager.wait_until_idle().await.unwrap();

    let status = manager.status(&id).unwrap();
    assert_eq!(status.state, BatchState::Downloaded);
    assert_eq!(status.bytes_downloaded, 2 * body.len() as u64);
    assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), body);
    assert_eq!(std::fs::read(dir.path().join("nested/b.bin")).unwrap(), body);
    assert!(!dir.path().join("a.bin.part").exists());
    manager.shutdown().await.unwrap();
}
