//! `foldsync failed` and `foldsync retry`

use anyhow::Result;
use clap::Args;

use foldsync_core::domain::OperationId;
use foldsync_ipc::{OperationInfo, Request};

use super::CommandContext;
use crate::output::plural;

/// Longest error message shown in the table
const MAX_ERROR_WIDTH: usize = 60;

pub struct FailedCommand {
    pub folder: Option<String>,
}

impl FailedCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let operations = client.failed(self.folder.clone()).await?;

        let out = ctx.out;
        if out.is_json() {
            out.json(&serde_json::json!({ "operations": operations }));
            return Ok(());
        }

        if operations.is_empty() {
            out.success("No failed operations");
            return Ok(());
        }

        println!("{}", plural(operations.len(), "failed operation"));
        println!();
        println!("{:<8} {:<15} {:<12} {:<8} PATH", "ID", "FOLDER", "KIND", "RETRIES");
        println!("{}", "-".repeat(70));
        for op in &operations {
            println!(
                "{:<8} {:<15} {:<12} {:<8} {}",
                op.operation_id,
                op.folder,
                op.kind,
                op.retry_count,
                describe_path(op)
            );
            if let Some(error) = &op.last_error {
                println!("         {}", truncate(error, MAX_ERROR_WIDTH));
            }
        }
        println!();
        out.note("Retry with: foldsync retry <ID>");
        Ok(())
    }
}

fn describe_path(op: &OperationInfo) -> String {
    match &op.destination {
        Some(destination) => format!("{} -> {}", op.path, destination),
        None => op.path.to_string(),
    }
}

/// Cuts `text` to at most `max` characters, marking the cut with `...`
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[derive(Args)]
pub struct RetryCommand {
    /// Operation id, as shown by `foldsync failed`
    pub operation_id: OperationId,
}

impl RetryCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let outcome = client
            .command(&Request::RetryOperation {
                operation_id: self.operation_id,
            })
            .await?;

        ctx.out.ack(
            outcome,
            &format!("Operation {} requeued", self.operation_id),
            &format!("Operation {} is already queued", self.operation_id),
            serde_json::json!({ "operation_id": self.operation_id }),
        );
        Ok(())
    }
}
