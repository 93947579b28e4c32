//! foldsync daemon - background synchronization service
//!
//! Handles:
//! - One sync engine per configured folder pair
//! - The IPC socket used by the CLI and desktop clients
//! - Crash recovery of interrupted operations at startup
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Startup opens the journal, requeues operations a previous process left
//! in progress, reconciles configured folders and prunes old conflict
//! history. The IPC server and every folder engine then run as tasks under
//! one `CancellationToken`, cancelled on receipt of SIGTERM or SIGINT.
//! Transfers in flight at that point finish or time out; nothing new is
//! dequeued.

mod folders;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use foldsync_cache::{DatabasePool, SqliteChangeJournal};
use foldsync_conflict::ConflictResolver;
use foldsync_core::config::Config;
use foldsync_core::ports::{IChangeJournal, ILocalFileSystem, IRemoteStore};
use foldsync_ipc::{IpcServer, RequestHandler};
use foldsync_remote::RemoteClient;
use foldsync_sync::engine::EngineSettings;
use foldsync_sync::{FolderEngine, LocalFileSystemAdapter, RetryPolicy, SyncRegistry, TransferExecutor};

use crate::folders::reconcile_folders;

#[derive(Parser, Debug)]
#[command(name = "foldsyncd", version, about = "foldsync background synchronization daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Loads the configuration file, using defaults only when it does not exist
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::default()
    };

    let problems = config.validate();
    if !problems.is_empty() {
        let listing = problems
            .iter()
            .map(|p| format!("  - {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::bail!("Invalid configuration {}:\n{listing}", path.display());
    }
    Ok(config)
}

/// Main daemon service that wires the journal, engines and IPC together
struct DaemonService {
    config: Config,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    async fn run(self) -> Result<()> {
        let socket_path = self.config.ipc.socket_path.clone();
        if socket_path.exists() && UnixStream::connect(&socket_path).await.is_ok() {
            anyhow::bail!(
                "Another instance of foldsyncd is already running (socket {} is live)",
                socket_path.display()
            );
        }

        let db_path = &self.config.journal.db_path;
        let pool = DatabasePool::new(db_path)
            .await
            .with_context(|| format!("Failed to open journal {}", db_path.display()))?;
        let journal: Arc<dyn IChangeJournal> = Arc::new(SqliteChangeJournal::new(pool.pool().clone()));

        let recovered = journal
            .recover_interrupted()
            .await
            .context("Failed to requeue interrupted operations")?;
        if recovered > 0 {
            info!(count = recovered, "Requeued operations interrupted by the previous run");
        }

        let folders = reconcile_folders(journal.as_ref(), &self.config.folders).await?;

        let local_fs: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());
        let resolver = ConflictResolver::new(Arc::clone(&journal), Arc::clone(&local_fs));
        resolver
            .prune_resolved(self.config.journal.resolved_conflict_retention_days)
            .await
            .context("Failed to prune resolved conflicts")?;

        let remote: Arc<dyn IRemoteStore> = Arc::new(
            RemoteClient::from_config(&self.config.remote).context("Failed to create remote client")?,
        );
        let registry = Arc::new(SyncRegistry::new());
        let executor = Arc::new(TransferExecutor::new(
            Arc::clone(&journal),
            Arc::clone(&local_fs),
            Arc::clone(&remote),
            Arc::clone(&registry),
            RetryPolicy::from_config(&self.config.retry),
            self.config.transfer.operation_timeout(),
            self.config.transfer.max_concurrent_per_folder,
        ));

        let handler = Arc::new(RequestHandler::new(
            Arc::clone(&journal),
            resolver,
            Arc::clone(&registry),
        ));
        let server = IpcServer::new(socket_path, handler);
        let listener = server.bind().context("Failed to bind IPC socket")?;

        let mut tasks = JoinSet::new();
        let server_shutdown = self.shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = server.serve(listener, server_shutdown).await {
                error!(error = %e, "IPC server failed");
            }
        });

        let settings = EngineSettings::from_config(&self.config);
        for folder in folders {
            if !folder.local_root.is_dir() {
                warn!(
                    folder = %folder.name,
                    local_root = %folder.local_root.display(),
                    "Local root is missing, folder not started"
                );
                continue;
            }

            let name = folder.name.clone();
            let engine = FolderEngine::new(
                folder,
                Arc::clone(&journal),
                Arc::clone(&local_fs),
                Arc::clone(&remote),
                Arc::clone(&executor),
                Arc::clone(&registry),
                settings.clone(),
            )
            .await
            .with_context(|| format!("Failed to start folder {name}"))?;
            tasks.spawn(Arc::new(engine).run(self.shutdown.clone()));
        }

        info!("foldsync daemon running");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Daemon task panicked");
            }
        }

        pool.close().await;
        Ok(())
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = load_config(&config_path)?;

    logging::init(&config.logging);
    info!(config_path = %config_path.display(), folders = config.folders.len(), "foldsync daemon starting");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = DaemonService::new(config, shutdown).run().await;
    match &result {
        Ok(()) => info!("foldsync daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "foldsync daemon exiting with error"),
    }
    result
}
