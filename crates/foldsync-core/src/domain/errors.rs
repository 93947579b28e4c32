//! Domain error types
//!
//! This module defines the validation errors raised by domain types and the
//! failure taxonomy used by the engine to decide what happens after an
//! operation fails:
//!
//! | Class       | Examples                                   | Handling                         |
//! |-------------|--------------------------------------------|----------------------------------|
//! | Transient   | timeout, connection reset, 5xx, 429        | retried with backoff             |
//! | Conflict    | optimistic-concurrency guard mismatch      | operation abandoned, re-planned  |
//! | Permanent   | 401/403, 404 on download, hash mismatch    | marked failed, surfaced          |
//! | Fatal       | journal corruption                         | folder halted, surfaced          |
//!
//! Typed errors ([`TransferError`], [`StorageError`]) travel inside
//! `anyhow::Error` across port boundaries and are recovered by
//! [`FailureClass::of`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid content hash
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Unknown value while parsing a stored enum
    #[error("Unknown {kind}: {value}")]
    UnknownValue {
        /// Name of the enum being parsed
        kind: &'static str,
        /// The offending value
        value: String,
    },
}

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Classification of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retried per the retry policy, invisible until attempts are exhausted
    Transient,
    /// Both sides diverged; the operation is abandoned and the path re-planned
    Conflict,
    /// Marked failed and surfaced; never retried automatically
    Permanent,
    /// Storage is unusable; the affected folder halts
    Fatal,
}

impl FailureClass {
    /// Classify an error crossing a port boundary
    ///
    /// Typed errors are recovered by downcasting. Anything else is inspected
    /// by message: network-looking failures are transient, the rest permanent.
    pub fn of(err: &anyhow::Error) -> Self {
        if let Some(transfer) = err.downcast_ref::<TransferError>() {
            return transfer.class();
        }
        if let Some(storage) = err.downcast_ref::<StorageError>() {
            return storage.class();
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return io_error_class(io);
        }

        let msg = format!("{err:#}").to_lowercase();
        if msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("connection")
            || msg.contains("network")
            || msg.contains("temporarily unavailable")
            || msg.contains("429")
            || msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
        {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }

    /// Stable lowercase name used in logs and the IPC protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Conflict => "conflict",
            FailureClass::Permanent => "permanent",
            FailureClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn io_error_class(err: &std::io::Error) -> FailureClass {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::BrokenPipe => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

/// Failure of a single transfer against the remote store or local tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The call did not finish within its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Connection could not be established or was reset
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Remote returned a 5xx status
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Remote returned 429
    #[error("Rate limited by server")]
    RateLimited {
        /// Delay requested by the server, if any
        retry_after_secs: Option<u64>,
    },

    /// Remote object does not exist
    #[error("Remote object not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failure
    #[error("Access denied ({status}): {message}")]
    Unauthorized {
        /// HTTP status code (401 or 403)
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The remote version no longer matches the expected token
    #[error("Remote version changed: {0}")]
    VersionMismatch(String),

    /// The local file no longer matches the state the operation was planned on
    #[error("Local file changed: {0}")]
    LocalChanged(String),

    /// A directory scheduled for deletion still has children
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Received or stored content does not hash to the expected value
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Hash reported by the source
        expected: String,
        /// Hash computed locally
        actual: String,
    },

    /// Any other client error
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },
}

impl TransferError {
    /// Failure class of this error
    pub fn class(&self) -> FailureClass {
        match self {
            TransferError::Timeout(_)
            | TransferError::Connection(_)
            | TransferError::Server { .. }
            | TransferError::RateLimited { .. } => FailureClass::Transient,
            TransferError::VersionMismatch(_)
            | TransferError::LocalChanged(_)
            | TransferError::DirectoryNotEmpty(_) => FailureClass::Conflict,
            TransferError::NotFound(_)
            | TransferError::Unauthorized { .. }
            | TransferError::IntegrityMismatch { .. }
            | TransferError::Rejected { .. } => FailureClass::Permanent,
        }
    }

    /// Delay the server asked for before the next attempt
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            TransferError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Failure of the durable journal
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database is locked by a concurrent writer
    #[error("Journal busy: {0}")]
    Busy(String),

    /// Database file is damaged or not a database
    #[error("Journal corrupted: {0}")]
    Corrupted(String),

    /// Any other storage failure
    #[error("Journal failure: {0}")]
    Failed(String),
}

impl StorageError {
    /// Failure class of this error
    pub fn class(&self) -> FailureClass {
        match self {
            StorageError::Busy(_) => FailureClass::Transient,
            StorageError::Corrupted(_) | StorageError::Failed(_) => FailureClass::Fatal,
        }
    }
}
