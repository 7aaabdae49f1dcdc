//! Storage failures during ingestion and lookup.

mod common;

use axum::http::StatusCode;
use chunkd_storage::ObjectStore;
use common::{Fault, FaultyBackend, TestServer, file_upload, seeded_data};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_chunk_outage_fails_upload_and_cleans_up() {
    let backend = FaultyBackend::new();
    backend.fail_writes("chunk_2_of_3", Fault::Unavailable);
    let server = TestServer::remote(4, backend.clone());

    let (status, body) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "storage_unavailable");

    // Chunk 1 was written, then removed; nothing was registered.
    assert!(backend.inner.is_empty(), "left: {:?}", backend.inner.keys());
    assert!(backend.deletes.load(Ordering::SeqCst) >= 1);
    assert_eq!(server.state.registry.cached(), 0);

    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_quota_refusal_is_insufficient_storage() {
    let backend = FaultyBackend::new();
    backend.fail_writes("chunks/", Fault::Quota);
    let server = TestServer::remote(4, backend.clone());

    let (status, body) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(body["code"], "storage_quota_exceeded");
}

#[tokio::test]
async fn test_manifest_write_failure_registers_nothing() {
    let backend = FaultyBackend::new();
    backend.fail_writes("metadata/", Fault::Unavailable);
    let server = TestServer::remote(4, backend.clone());

    let (status, _) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.state.registry.cached(), 0);
    assert!(backend.inner.is_empty());
}

#[tokio::test]
async fn test_orphans_kept_when_cleanup_disabled() {
    let backend = FaultyBackend::new();
    backend.fail_writes("chunk_3_of_3", Fault::Unavailable);
    let server = TestServer::remote_with(backend.clone(), |config| {
        config.server.max_chunk_size = 4;
        config.server.cleanup_on_failure = false;
    });

    let (status, _) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.inner.len(), 2);
    assert_eq!(backend.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(server.state.registry.cached(), 0);
}

#[tokio::test]
async fn test_retry_after_outage_succeeds() {
    let backend = FaultyBackend::new();
    backend.fail_writes("chunks/", Fault::Unavailable);
    let server = TestServer::remote(4, backend.clone());
    let data = seeded_data(10, 9);

    let (status, _) = server.send(file_upload("a.mp3", &data)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    backend.heal();
    let (status, body) = server.send(file_upload("a.mp3", &data)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["num_chunks"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_store_times_out() {
    let backend = FaultyBackend::new();
    backend.fail_writes("chunks/", Fault::Stall(Duration::from_secs(30)));
    let server = TestServer::remote_with(backend.clone(), |config| {
        config.server.max_chunk_size = 4;
        config.server.storage_timeout_secs = 1;
    });

    let (status, body) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        body["detail"].as_str().unwrap().contains("timed out"),
        "{body}"
    );
}

#[tokio::test]
async fn test_durable_lookup_outage_is_unavailable() {
    let backend = FaultyBackend::new();
    let server = TestServer::remote(4, backend.clone());
    let (_, uploaded) = server.send(file_upload("a.mp3", b"0123456789")).await;
    let file_id = uploaded["file_id"].as_str().unwrap();

    server.state.registry.clear_cache();
    backend.fail_reads("metadata/", Fault::Unavailable);
    let (status, body) = server.get(&format!("/chunks/{file_id}")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "storage_unavailable");

    backend.heal();
    let (status, _) = server.get(&format!("/chunks/{file_id}")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_corrupt_durable_manifest_is_internal_error() {
    let backend = FaultyBackend::new();
    let server = TestServer::remote(4, backend.clone());
    let file_id = uuid::Uuid::new_v4();
    backend
        .inner
        .put(
            &format!("metadata/{file_id}.json"),
            bytes::Bytes::from_static(b"{\"file_id\": 1"),
        )
        .await
        .unwrap();

    let (status, body) = server.get(&format!("/chunks/{file_id}")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "internal_error");
}

#[tokio::test]
async fn test_local_failure_removes_spooled_original() {
    let server = TestServer::local(4).await;
    let root = server.storage_root().unwrap();

    // A file where the chunk directory should be makes chunk writes fail.
    std::fs::write(root.join("chunks"), b"in the way").unwrap();

    // A misplaced directory is permanent, not a retryable outage.
    let (status, body) = server.send(file_upload("a.mp3", b"0123456789")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{body}");
    assert_eq!(body["code"], "storage_error");

    let uploads = root.join("uploads");
    let leftover = std::fs::read_dir(&uploads)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
    assert_eq!(server.state.registry.cached(), 0);
}
