//! foldsync CLI - control a running foldsyncd
//!
//! Talks to the daemon over its Unix socket. Every command works in human
//! readable or JSON form (`--json`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::conflicts::{ConflictsCommand, ResolveCommand};
use commands::control::{ControlAction, ControlCommand};
use commands::operations::{FailedCommand, RetryCommand};
use commands::status::StatusCommand;
use commands::watch::WatchCommand;
use commands::CommandContext;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "foldsync")]
#[command(about = "Control the foldsync synchronization daemon")]
#[command(version)]
struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Daemon socket, overrides the one from the configuration
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Configuration file used to locate the daemon socket
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the status of every folder
    Status,
    /// List unresolved conflicts
    Conflicts {
        /// Only show conflicts of this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Resolve a conflict
    Resolve(ResolveCommand),
    /// List failed operations
    Failed {
        /// Only show operations of this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Requeue a failed operation
    Retry(RetryCommand),
    /// Pause synchronization of a folder
    Pause {
        /// Folder name
        folder: String,
    },
    /// Resume synchronization of a folder
    Resume {
        /// Folder name
        folder: String,
    },
    /// Rescan a folder on both sides
    Rescan {
        /// Folder name
        folder: String,
    },
    /// Follow daemon notifications until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CommandContext::new(cli.socket, cli.config, format);

    let result = match cli.command {
        Commands::Status => StatusCommand.execute(&ctx).await,
        Commands::Conflicts { folder } => ConflictsCommand { folder }.execute(&ctx).await,
        Commands::Resolve(cmd) => cmd.execute(&ctx).await,
        Commands::Failed { folder } => FailedCommand { folder }.execute(&ctx).await,
        Commands::Retry(cmd) => cmd.execute(&ctx).await,
        Commands::Pause { folder } => ControlCommand::new(ControlAction::Pause, folder).execute(&ctx).await,
        Commands::Resume { folder } => ControlCommand::new(ControlAction::Resume, folder).execute(&ctx).await,
        Commands::Rescan { folder } => ControlCommand::new(ControlAction::Rescan, folder).execute(&ctx).await,
        Commands::Watch => WatchCommand.execute(&ctx).await,
    };

    if let Err(e) = result {
        Output::new(format).error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
