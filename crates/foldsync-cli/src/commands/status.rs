//! `foldsync status`

use anyhow::Result;

use foldsync_ipc::SyncStats;

use super::CommandContext;

pub struct StatusCommand;

impl StatusCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let folders = client.status().await?;

        let out = ctx.out;
        if out.is_json() {
            out.json(&serde_json::json!({ "folders": folders }));
            return Ok(());
        }

        if folders.is_empty() {
            out.note("No folders configured");
            return Ok(());
        }
        for stats in &folders {
            println!("{}", status_line(stats));
            if let Some(error) = &stats.error {
                out.warn(&format!("{}: {}", stats.folder, error));
            }
        }
        Ok(())
    }
}

/// One aligned row per folder
fn status_line(stats: &SyncStats) -> String {
    format!(
        "{:<20} {:<9} pending {:<5} failed {:<5} conflicts {}",
        stats.folder, stats.status, stats.pending, stats.failed, stats.conflicts
    )
}
