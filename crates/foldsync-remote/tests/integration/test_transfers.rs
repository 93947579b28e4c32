//! Content transfers and mutating calls

use foldsync_core::domain::{FailureClass, TransferError};
use foldsync_core::ports::IRemoteStore;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

// ============================================================================
// Downloads
// ============================================================================

#[tokio::test]
async fn test_download_streams_to_file() {
    let (server, client) = common::setup().await;
    let content: Vec<u8> = (0..262_144).map(|i| (i % 251) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/v1/content"))
        .and(query_param("path", "/docs/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("big.bin.partial");
    let written = client.download("/docs/big.bin", &dest).await.unwrap();

    assert_eq!(written, content.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_download_truncates_existing_file() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("a.txt");
    std::fs::write(&dest, b"much longer stale content").unwrap();

    assert_eq!(client.download("/docs/a.txt", &dest).await.unwrap(), 3);
    assert_eq!(std::fs::read(&dest).unwrap(), b"new");
}

#[tokio::test]
async fn test_download_missing_item_is_not_found() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/content"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("gone.txt");
    let err = client.download("/docs/gone.txt", &dest).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::NotFound(p)) if p == "/docs/gone.txt"
    ));
    assert!(!dest.exists());
}

// ============================================================================
// Uploads
// ============================================================================

/// Writes `data` to a local file to upload from
fn local_file(dir: &TempDir, data: &[u8]) -> std::path::PathBuf {
    let source = dir.path().join("source.bin");
    std::fs::write(&source, data).unwrap();
    source
}

#[tokio::test]
async fn test_upload_new_file_requires_absence() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/content"))
        .and(query_param("path", "/docs/new.txt"))
        .and(header("if-none-match", "*"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(common::file_entry("/docs/new.txt", "2cf2", 5, "v1")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let entry = client
        .upload("/docs/new.txt", &local_file(&dir, b"hello"), None)
        .await
        .unwrap();
    assert_eq!(entry.version, "v1");
    assert_eq!(entry.size, 5);
}

#[tokio::test]
async fn test_upload_streams_large_file() {
    let (server, client) = common::setup().await;
    let content: Vec<u8> = (0..1_048_576).map(|i| (i % 253) as u8).collect();

    Mock::given(method("PUT"))
        .and(path("/v1/content"))
        .and(header("content-length", "1048576"))
        .and(body_bytes(content.clone()))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(common::file_entry("/docs/big.bin", "77aa", 1_048_576, "v1")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let entry = client
        .upload("/docs/big.bin", &local_file(&dir, &content), None)
        .await
        .unwrap();
    assert_eq!(entry.size, 1_048_576);
}

#[tokio::test]
async fn test_upload_missing_source_fails_before_request() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = client
        .upload("/docs/a.txt", &dir.path().join("missing.txt"), None)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_upload_existing_file_sends_if_match() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/content"))
        .and(header("if-match", "v4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::file_entry("/docs/a.txt", "beef", 7, "v5")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let entry = client
        .upload("/docs/a.txt", &local_file(&dir, b"changed"), Some("v4"))
        .await
        .unwrap();
    assert_eq!(entry.version, "v5");
}

#[tokio::test]
async fn test_upload_stale_version_is_conflict() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/content"))
        .respond_with(ResponseTemplate::new(412).set_body_string("version is v9"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = client
        .upload("/docs/a.txt", &local_file(&dir, b"x"), Some("v4"))
        .await
        .unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Conflict);
    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::VersionMismatch(_))
    ));
}

#[tokio::test]
async fn test_upload_over_existing_item_is_conflict() {
    let (server, client) = common::setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/content"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = client
        .upload("/docs/a.txt", &local_file(&dir, b"x"), None)
        .await
        .unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Conflict);
}

// ============================================================================
// Directories, deletes and moves
// ============================================================================

#[tokio::test]
async fn test_create_dir() {
    let (server, client) = common::setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/directories"))
        .and(query_param("path", "/docs/reports"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(common::dir_entry("/docs/reports", "v1")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let entry = client.create_dir("/docs/reports").await.unwrap();
    assert!(entry.is_dir);
    assert_eq!(entry.path, "/docs/reports");
}

#[tokio::test]
async fn test_delete_with_version_guard() {
    let (server, client) = common::setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/items"))
        .and(query_param("path", "/docs/a.txt"))
        .and(header("if-match", "v3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.delete("/docs/a.txt", Some("v3")).await.unwrap();
}

#[tokio::test]
async fn test_delete_non_empty_directory_is_conflict() {
    let (server, client) = common::setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/items"))
        .respond_with(ResponseTemplate::new(409).set_body_string("directory not empty"))
        .mount(&server)
        .await;

    let err = client.delete("/docs/reports", Some("v1")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::DirectoryNotEmpty(p)) if p == "/docs/reports"
    ));
    assert_eq!(FailureClass::of(&err), FailureClass::Conflict);
}

#[tokio::test]
async fn test_rename_posts_move_body() {
    let (server, client) = common::setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/move"))
        .and(header("if-match", "v2"))
        .and(body_json(json!({ "from": "/docs/a.txt", "to": "/docs/b.txt" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::file_entry("/docs/b.txt", "2cf2", 5, "v3")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let entry = client
        .rename("/docs/a.txt", "/docs/b.txt", Some("v2"))
        .await
        .unwrap();
    assert_eq!(entry.path, "/docs/b.txt");
    assert_eq!(entry.version, "v3");
}

#[tokio::test]
async fn test_rename_missing_source_is_not_found() {
    let (server, client) = common::setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/move"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client
        .rename("/docs/a.txt", "/docs/b.txt", None)
        .await
        .unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Permanent);
}
