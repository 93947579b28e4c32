//! `foldsync watch` - follow daemon notifications

use anyhow::Result;

use foldsync_ipc::Message;

use super::CommandContext;

pub struct WatchCommand;

impl WatchCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;

        // Current state first, then changes as they happen
        for stats in client.status().await? {
            self.print(ctx, &Message::SyncStats(stats));
        }
        client.subscribe().await?;
        ctx.out.note("Watching for changes, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                message = client.next_message() => match message? {
                    Some(message) => self.print(ctx, &message),
                    None => {
                        ctx.out.warn("Daemon closed the connection");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    fn print(&self, ctx: &CommandContext, message: &Message) {
        if ctx.out.is_json() {
            // One object per line so the stream can be piped
            if let Ok(line) = serde_json::to_string(message) {
                println!("{line}");
            }
            return;
        }
        if let Some(line) = describe(message) {
            let now = chrono::Local::now().format("%H:%M:%S");
            println!("{now} {line}");
        }
    }
}

/// Human form of a notification, `None` for messages not worth showing
fn describe(message: &Message) -> Option<String> {
    match message {
        Message::SyncStats(stats) => Some(format!(
            "{}: {} (pending {}, failed {}, conflicts {})",
            stats.folder, stats.status, stats.pending, stats.failed, stats.conflicts
        )),
        Message::ConflictDetected { folder, path } => {
            Some(format!("{folder}: conflict on {path}"))
        }
        Message::OperationFailed {
            folder,
            operation_id,
            kind,
            path,
            class,
            error,
        } => Some(format!(
            "{folder}: {kind} {path} failed ({class}, operation {operation_id}): {error}"
        )),
        Message::FolderError { folder, message } => Some(format!("{folder}: halted: {message}")),
        Message::Error { message } => Some(format!("error: {message}")),
        Message::Ack { .. } | Message::Conflicts { .. } | Message::Operations { .. } => None,
    }
}
