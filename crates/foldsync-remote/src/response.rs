//! Classification of HTTP responses and transport errors

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::warn;

use foldsync_core::domain::TransferError;

/// Longest `Retry-After` honoured; longer delta-seconds are capped, further dates ignored
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Which call a status belongs to, where the same status means different things
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
    Delete,
}

/// Parses a `Retry-After` header value
///
/// Supports delta-seconds and HTTP dates. Delta-seconds are capped at an
/// hour; dates in the past or more than an hour away yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return wait
            .to_std()
            .ok()
            .filter(|d| *d <= MAX_RETRY_AFTER);
    }

    warn!(value, "Could not parse Retry-After header");
    None
}

/// Maps a non-success status onto the transfer error taxonomy
pub fn status_error(
    status: StatusCode,
    kind: CallKind,
    path: &str,
    retry_after: Option<Duration>,
    body: String,
) -> TransferError {
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no reason given")
            .to_string()
    } else {
        body
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransferError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::NOT_FOUND => TransferError::NotFound(path.to_string()),
        StatusCode::PRECONDITION_FAILED => {
            TransferError::VersionMismatch(format!("{path}: {message}"))
        }
        StatusCode::CONFLICT if kind == CallKind::Delete => {
            TransferError::DirectoryNotEmpty(path.to_string())
        }
        StatusCode::CONFLICT if kind == CallKind::Write => {
            TransferError::VersionMismatch(format!("{path}: {message}"))
        }
        StatusCode::TOO_MANY_REQUESTS => TransferError::RateLimited {
            retry_after_secs: retry_after.map(|d| d.as_secs()),
        },
        StatusCode::REQUEST_TIMEOUT => TransferError::Timeout(format!("{path}: {message}")),
        s if s.is_server_error() => TransferError::Server {
            status: s.as_u16(),
            message,
        },
        s => TransferError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Turns a non-success response into a [`TransferError`], passing successes through
pub async fn check(
    response: Response,
    kind: CallKind,
    path: &str,
) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, kind, path, retry_after, body))
}

/// Maps a reqwest transport failure
pub fn transport_error(err: reqwest::Error, path: &str) -> TransferError {
    if err.is_timeout() {
        TransferError::Timeout(format!("{path}: {err}"))
    } else if err.is_decode() {
        TransferError::Rejected {
            status: err.status().map_or(0, |s| s.as_u16()),
            message: format!("undecodable response for {path}: {err}"),
        }
    } else {
        TransferError::Connection(format!("{path}: {err}"))
    }
}
