//! Listing and metadata calls

use foldsync_core::domain::{FailureClass, TransferError};
use foldsync_core::ports::IRemoteStore;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_list_returns_entries() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .and(query_param("path", "/shares/alice/docs"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                common::dir_entry("/shares/alice/docs/reports", "v1"),
                common::file_entry("/shares/alice/docs/reports/q1.txt", "abc123", 42, "v7"),
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client.list("/shares/alice/docs").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_dir);
    assert_eq!(entries[0].hash, None);
    assert_eq!(entries[1].path, "/shares/alice/docs/reports/q1.txt");
    assert_eq!(entries[1].hash.as_deref(), Some("abc123"));
    assert_eq!(entries[1].size, 42);
    assert_eq!(entries[1].version, "v7");
    assert!(entries[1].mtime.is_some());
}

#[tokio::test]
async fn test_list_empty_folder() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    assert!(client.list("/empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_unauthorized_is_permanent() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let err = client.list("/docs").await.unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Permanent);
    match err.downcast_ref::<TransferError>() {
        Some(TransferError::Unauthorized { status, message }) => {
            assert_eq!(*status, 401);
            assert_eq!(message, "token expired");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_list_rate_limited_carries_retry_after() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
        .mount(&server)
        .await;

    let err = client.list("/docs").await.unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Transient);
    let transfer = err.downcast_ref::<TransferError>().unwrap();
    assert_eq!(transfer.retry_after_secs(), Some(17));
}

#[tokio::test]
async fn test_list_server_error_is_transient() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.list("/docs").await.unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Transient);
}

#[tokio::test]
async fn test_list_malformed_body_is_rejected() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client.list("/docs").await.unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Permanent);
}

#[tokio::test]
async fn test_stat_existing_item() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/metadata"))
        .and(query_param("path", "/docs/a.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::file_entry("/docs/a.txt", "ffee", 3, "v2")),
        )
        .mount(&server)
        .await;

    let entry = client.stat("/docs/a.txt").await.unwrap().unwrap();
    assert_eq!(entry.version, "v2");
    assert_eq!(entry.hash.as_deref(), Some("ffee"));
}

#[tokio::test]
async fn test_stat_missing_item_is_none() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/metadata"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.stat("/docs/gone.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    // Nothing listens on port 1
    let client = foldsync_remote::RemoteClient::with_base_url("http://127.0.0.1:1").unwrap();
    let err = client.list("/docs").await.unwrap_err();
    assert_eq!(FailureClass::of(&err), FailureClass::Transient);
    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::Connection(_))
    ));
}
