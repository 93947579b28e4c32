//! Async IPC client
//!
//! Used by the CLI. One client holds one connection; requests are answered
//! in order, so a client must not be shared between tasks.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::protocol::{AckOutcome, ConflictInfo, Message, OperationInfo, Request, SyncStats};
use crate::server::write_message;
use crate::IpcError;

pub struct IpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(socket_path).await?;
        debug!(path = %socket_path.display(), "Connected to daemon");
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        })
    }

    pub async fn send(&mut self, request: &Request) -> Result<(), IpcError> {
        write_message(&mut self.writer, request).await
    }

    /// Next message from the daemon, `None` once the connection closed
    pub async fn next_message(&mut self) -> Result<Option<Message>, IpcError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&line)?));
        }
    }

    /// Sends a request and returns the first answer that is not a notification
    pub async fn request(&mut self, request: &Request) -> Result<Message, IpcError> {
        self.send(request).await?;
        self.next_answer().await
    }

    async fn next_answer(&mut self) -> Result<Message, IpcError> {
        loop {
            match self.next_message().await? {
                None => return Err(IpcError::Disconnected),
                Some(message) if message.is_notification() => continue,
                Some(Message::Error { message }) => return Err(IpcError::Server(message)),
                Some(message) => return Ok(message),
            }
        }
    }

    /// Status of every folder
    pub async fn status(&mut self) -> Result<Vec<SyncStats>, IpcError> {
        self.send(&Request::GetStatus).await?;
        let mut folders = Vec::new();
        loop {
            match self.next_answer().await? {
                Message::SyncStats(stats) => folders.push(stats),
                Message::Ack { .. } => return Ok(folders),
                other => return Err(unexpected(&other)),
            }
        }
    }

    pub async fn conflicts(&mut self, folder: Option<String>) -> Result<Vec<ConflictInfo>, IpcError> {
        match self.request(&Request::ListConflicts { folder }).await? {
            Message::Conflicts { conflicts } => Ok(conflicts),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn failed(&mut self, folder: Option<String>) -> Result<Vec<OperationInfo>, IpcError> {
        match self.request(&Request::ListFailed { folder }).await? {
            Message::Operations { operations } => Ok(operations),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a command that is answered with an `ack`
    pub async fn command(&mut self, request: &Request) -> Result<AckOutcome, IpcError> {
        match self.request(request).await? {
            Message::Ack { outcome, .. } => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    /// Starts receiving notifications; read them with [`IpcClient::next_message`]
    pub async fn subscribe(&mut self) -> Result<(), IpcError> {
        self.command(&Request::Subscribe).await.map(|_| ())
    }
}

fn unexpected(message: &Message) -> IpcError {
    IpcError::UnexpectedResponse(
        serde_json::to_string(message).unwrap_or_else(|_| format!("{message:?}")),
    )
}
