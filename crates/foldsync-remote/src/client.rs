//! Remote transfer API client
//!
//! Wraps `reqwest::Client` with the bearer token, base URL construction and
//! optimistic concurrency headers, and implements
//! [`IRemoteStore`] on top of it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use foldsync_core::ports::IRemoteStore;
//! use foldsync_remote::RemoteClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RemoteClient::with_base_url("https://files.example.com")?;
//! let entries = client.list("/shares/alice/docs").await?;
//! println!("{} items", entries.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use foldsync_core::config::RemoteConfig;
use foldsync_core::domain::TransferError;
use foldsync_core::ports::{IRemoteStore, RemoteEntry};

use crate::response::{check, transport_error, CallKind};
use crate::RemoteError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `GET /v1/list`
#[derive(Debug, Deserialize)]
struct ListResponse {
    items: Vec<RemoteEntry>,
}

/// Body of `POST /v1/move`
#[derive(Debug, Serialize)]
struct MoveRequest<'a> {
    from: &'a str,
    to: &'a str,
}

/// HTTP client for the remote transfer API
pub struct RemoteClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteClient {
    /// Creates a client for `base_url`
    ///
    /// # Errors
    /// Returns [`RemoteError::InvalidBaseUrl`] unless the URL is http(s), or
    /// [`RemoteError::ClientBuild`] if reqwest cannot initialise.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::InvalidBaseUrl(base_url));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("foldsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(
            config.base_url.clone(),
            config.token.clone(),
            config.request_timeout(),
            config.connect_timeout(),
        )
    }

    /// Unauthenticated client with default timeouts (useful for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::new(base_url, None, DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Sets the bearer token sent with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a request for `endpoint` (e.g. `/v1/list`) with auth applied
    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        kind: CallKind,
        path: &str,
    ) -> Result<Response, TransferError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, path))?;
        check(response, kind, path).await
    }
}

async fn read_entry(response: Response, path: &str) -> Result<RemoteEntry, TransferError> {
    response
        .json::<RemoteEntry>()
        .await
        .map_err(|e| transport_error(e, path))
}

#[async_trait::async_trait]
impl IRemoteStore for RemoteClient {
    #[instrument(skip(self))]
    async fn list(&self, root: &str) -> anyhow::Result<Vec<RemoteEntry>> {
        let response = self
            .send(
                self.request(Method::GET, "/v1/list").query(&[("path", root)]),
                CallKind::Read,
                root,
            )
            .await?;
        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, root))?;
        debug!(items = body.items.len(), "Remote listing received");
        Ok(body.items)
    }

    #[instrument(skip(self))]
    async fn stat(&self, path: &str) -> anyhow::Result<Option<RemoteEntry>> {
        let response = self
            .request(Method::GET, "/v1/metadata")
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| transport_error(e, path))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, CallKind::Read, path).await?;
        Ok(Some(read_entry(response, path).await?))
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn download(&self, path: &str, dest: &Path) -> anyhow::Result<u64> {
        let response = self
            .send(
                self.request(Method::GET, "/v1/content").query(&[("path", path)]),
                CallKind::Read,
                path,
            )
            .await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error(e, path))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(bytes = written, "Download streamed");
        Ok(written)
    }

    #[instrument(skip(self, source), fields(source = %source.display()))]
    async fn upload(
        &self,
        path: &str,
        source: &Path,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry> {
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();

        let builder = self
            .request(Method::PUT, "/v1/content")
            .query(&[("path", path)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        let builder = match expected_version {
            Some(version) => builder.header(IF_MATCH, version),
            None => builder.header(IF_NONE_MATCH, "*"),
        };

        let response = self.send(builder, CallKind::Write, path).await?;
        let entry = read_entry(response, path).await?;
        debug!(bytes = length, version = %entry.version, "Upload accepted");
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn create_dir(&self, path: &str) -> anyhow::Result<RemoteEntry> {
        let response = self
            .send(
                self.request(Method::POST, "/v1/directories")
                    .query(&[("path", path)]),
                CallKind::Write,
                path,
            )
            .await?;
        Ok(read_entry(response, path).await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str, expected_version: Option<&str>) -> anyhow::Result<()> {
        let mut builder = self
            .request(Method::DELETE, "/v1/items")
            .query(&[("path", path)]);
        if let Some(version) = expected_version {
            builder = builder.header(IF_MATCH, version);
        }
        self.send(builder, CallKind::Delete, path).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(
        &self,
        from: &str,
        to: &str,
        expected_version: Option<&str>,
    ) -> anyhow::Result<RemoteEntry> {
        let mut builder = self
            .request(Method::POST, "/v1/move")
            .json(&MoveRequest { from, to });
        if let Some(version) = expected_version {
            builder = builder.header(IF_MATCH, version);
        }
        let response = self.send(builder, CallKind::Write, from).await?;
        Ok(read_entry(response, to).await?)
    }
}
