//! CLI command implementations

pub mod conflicts;
pub mod control;
pub mod operations;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use foldsync_core::config::Config;
use foldsync_ipc::IpcClient;

use crate::output::{Output, OutputFormat};

/// Shared state of a CLI invocation
pub struct CommandContext {
    socket: Option<PathBuf>,
    config: Option<PathBuf>,
    pub out: Output,
}

impl CommandContext {
    pub fn new(socket: Option<PathBuf>, config: Option<PathBuf>, format: OutputFormat) -> Self {
        Self {
            socket,
            config,
            out: Output::new(format),
        }
    }

    /// Socket to connect to: `--socket`, else the configured one
    pub fn socket_path(&self) -> PathBuf {
        if let Some(socket) = &self.socket {
            return socket.clone();
        }
        let config_path = self.config.clone().unwrap_or_else(Config::default_path);
        Config::load_or_default(&config_path).ipc.socket_path
    }

    pub async fn connect(&self) -> Result<IpcClient> {
        let path = self.socket_path();
        debug!(socket = %path.display(), "Connecting to daemon");
        IpcClient::connect(&path).await.with_context(|| {
            format!(
                "Cannot connect to {}. Is foldsyncd running?",
                path.display()
            )
        })
    }
}
