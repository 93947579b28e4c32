//! `foldsync conflicts` and `foldsync resolve`

use anyhow::Result;
use clap::Args;

use foldsync_core::domain::{ConflictId, Resolution, VersionInfo};
use foldsync_ipc::{ConflictInfo, Request};

use super::CommandContext;
use crate::output::{format_bytes, plural};

pub struct ConflictsCommand {
    pub folder: Option<String>,
}

impl ConflictsCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let conflicts = client.conflicts(self.folder.clone()).await?;

        let out = ctx.out;
        if out.is_json() {
            out.json(&serde_json::json!({ "conflicts": conflicts }));
            return Ok(());
        }

        if conflicts.is_empty() {
            out.success("No unresolved conflicts");
            return Ok(());
        }

        println!("{}", plural(conflicts.len(), "unresolved conflict"));
        println!();
        println!("{:<8} {:<15} {:<14} PATH", "ID", "FOLDER", "KIND");
        println!("{}", "-".repeat(70));
        for conflict in &conflicts {
            print_conflict(conflict);
        }
        println!();
        out.note("Resolve with: foldsync resolve <ID> keep-local|keep-remote|keep-both");
        Ok(())
    }
}

fn print_conflict(conflict: &ConflictInfo) {
    println!(
        "{:<8} {:<15} {:<14} {}",
        conflict.conflict_id,
        conflict.folder,
        conflict.kind.as_str(),
        conflict.path
    );
    println!("         local:  {}", describe_version(&conflict.local));
    println!("         remote: {}", describe_version(&conflict.remote));
}

/// Short description of one side of a conflict
fn describe_version(version: &VersionInfo) -> String {
    let Some(hash) = &version.hash else {
        return "deleted".to_string();
    };
    if hash.is_directory() {
        return "directory".to_string();
    }
    let mut parts = vec![hash.short().to_string()];
    if let Some(size) = version.size {
        parts.push(format_bytes(size));
    }
    if let Some(mtime) = version.mtime {
        parts.push(mtime.format("%Y-%m-%d %H:%M").to_string());
    }
    parts.join(", ")
}

#[derive(Args)]
pub struct ResolveCommand {
    /// Conflict id, as shown by `foldsync conflicts`
    pub conflict_id: ConflictId,
    /// keep-local, keep-remote or keep-both
    pub resolution: Resolution,
}

impl ResolveCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let outcome = client
            .command(&Request::ResolveConflict {
                conflict_id: self.conflict_id,
                resolution: self.resolution,
            })
            .await?;

        ctx.out.ack(
            outcome,
            &format!("Conflict {} resolved ({})", self.conflict_id, self.resolution),
            &format!("Conflict {} was already resolved", self.conflict_id),
            serde_json::json!({
                "conflict_id": self.conflict_id,
                "resolution": self.resolution,
            }),
        );
        Ok(())
    }
}
