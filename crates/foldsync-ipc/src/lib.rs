//! foldsync IPC - local control protocol for the daemon
//!
//! The daemon listens on a Unix domain socket. Every message is a single
//! JSON object on its own line, shaped `{"type": ..., "data": {...}}`.
//!
//! ## Modules
//!
//! - [`protocol`] - Request, response and notification messages
//! - [`handler`] - Executes requests against the journal and engine registry
//! - [`server`] - Socket listener and per-connection loop
//! - [`client`] - Async client used by the CLI

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

use thiserror::Error;

pub use client::IpcClient;
pub use handler::RequestHandler;
pub use protocol::{AckOutcome, ConflictInfo, Message, OperationInfo, Request, SyncStats};
pub use server::IpcServer;

/// Errors on either end of an IPC connection
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed IPC message: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer closed the connection before answering
    #[error("Connection closed by peer")]
    Disconnected,

    /// The daemon answered with an `error` message
    #[error("Daemon error: {0}")]
    Server(String),

    /// The daemon answered with a message the request does not expect
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}
