//! foldsync Remote - HTTP adapter for the remote transfer API
//!
//! Provides:
//! - [`client::RemoteClient`], the reqwest implementation of
//!   [`IRemoteStore`](foldsync_core::ports::IRemoteStore)
//! - Mapping of HTTP statuses and transport failures onto
//!   [`TransferError`](foldsync_core::domain::TransferError) so the executor
//!   can classify them
//!
//! ## Endpoints
//!
//! All paths are passed as the `path` query parameter.
//!
//! | Call        | Request                                                |
//! |-------------|--------------------------------------------------------|
//! | list        | `GET /v1/list?path=<root>` → `{"items": [entry...]}`   |
//! | stat        | `GET /v1/metadata?path=` → entry, 404 if absent        |
//! | download    | `GET /v1/content?path=` → raw bytes (streamed)         |
//! | upload      | `PUT /v1/content?path=` + `If-Match` / `If-None-Match` |
//! | create_dir  | `POST /v1/directories?path=` → entry                   |
//! | delete      | `DELETE /v1/items?path=` + `If-Match`                  |
//! | rename      | `POST /v1/move` `{"from", "to"}` + `If-Match` → entry  |
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client and port implementation
//! - [`response`] - Status classification and `Retry-After` parsing

pub mod client;
pub mod response;

use thiserror::Error;

pub use client::RemoteClient;

/// Errors raised while building the remote client
///
/// Failures of individual calls are reported as
/// [`TransferError`](foldsync_core::domain::TransferError) instead.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The configured base URL is empty or not http(s)
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// reqwest could not build its client (TLS backend, proxy settings)
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}
