//! Shared wiremock helpers

use serde_json::{json, Value};
use wiremock::MockServer;

use foldsync_remote::RemoteClient;

pub const TOKEN: &str = "test-token";

/// Starts a mock server and an authenticated client pointing at it
pub async fn setup() -> (MockServer, RemoteClient) {
    let server = MockServer::start().await;
    let client = RemoteClient::with_base_url(server.uri())
        .expect("mock server URI is http")
        .with_token(TOKEN);
    (server, client)
}

pub fn file_entry(path: &str, hash: &str, size: u64, version: &str) -> Value {
    json!({
        "path": path,
        "hash": hash,
        "size": size,
        "version": version,
        "mtime": "2026-03-01T10:00:00Z",
        "is_dir": false
    })
}

pub fn dir_entry(path: &str, version: &str) -> Value {
    json!({
        "path": path,
        "version": version,
        "is_dir": true
    })
}
