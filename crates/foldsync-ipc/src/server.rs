//! Unix domain socket server
//!
//! Each connection reads requests line by line and writes each answer as
//! soon as it is ready. After `subscribe` the same connection also receives
//! notifications, interleaved with answers to further requests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foldsync_core::domain::SyncEvent;

use crate::handler::RequestHandler;
use crate::protocol::{AckOutcome, Message, Request};
use crate::IpcError;

/// Serves the IPC protocol on a Unix socket
pub struct IpcServer {
    socket_path: PathBuf,
    handler: Arc<RequestHandler>,
}

impl IpcServer {
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<RequestHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale one left by a previous run
    ///
    /// The socket is only accessible by the owning user.
    pub fn bind(&self) -> Result<UnixListener, IpcError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.socket_path.exists() {
            debug!(path = %self.socket_path.display(), "Removing stale socket");
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    /// Binds and serves until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), IpcError> {
        let listener = self.bind()?;
        self.serve(listener, cancel).await
    }

    /// Accepts connections until `cancel` fires, then removes the socket file
    pub async fn serve(self, listener: UnixListener, cancel: CancellationToken) -> Result<(), IpcError> {
        info!(path = %self.socket_path.display(), "IPC server listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&self.handler);
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, cancel).await {
                                debug!(error = %e, "IPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Could not remove socket file");
        }
        info!("IPC server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: UnixStream,
    handler: Arc<RequestHandler>,
    cancel: CancellationToken,
) -> Result<(), IpcError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut events: Option<broadcast::Receiver<SyncEvent>> = None;
    debug!("IPC client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                let messages = match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Subscribe) => {
                        let outcome = AckOutcome::from_changed(events.is_none());
                        if events.is_none() {
                            events = Some(handler.subscribe());
                        }
                        vec![Message::ack("subscribe", outcome)]
                    }
                    Ok(request) => handler.handle(request).await,
                    Err(e) => vec![Message::error(format!("invalid request: {e}"))],
                };
                for message in &messages {
                    write_message(&mut write_half, message).await?;
                }
            }
            event = next_event(&mut events) => match event {
                Ok(event) => {
                    if let Some(message) = handler.notification_for(&event).await {
                        write_message(&mut write_half, &message).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events cannot be replayed; resend the full status instead
                    warn!(skipped, "Subscriber lagged behind, resending status");
                    match handler.status_all().await {
                        Ok(messages) => {
                            for message in &messages {
                                write_message(&mut write_half, message).await?;
                            }
                        }
                        Err(e) => warn!(error = %format!("{e:#}"), "Cannot resend status"),
                    }
                }
                Err(RecvError::Closed) => events = None,
            },
        }
    }

    debug!("IPC client disconnected");
    Ok(())
}

/// Waits for the next event, or forever when not subscribed
async fn next_event(events: &mut Option<broadcast::Receiver<SyncEvent>>) -> Result<SyncEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Writes one message as a JSON line
pub(crate) async fn write_message<W>(writer: &mut W, message: &impl serde::Serialize) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
