//! Reconciles configured folder pairs with the journal
//!
//! The configuration is authoritative: new pairs are registered, pairs that
//! disappeared from the configuration are removed with all their records,
//! and a pair whose roots changed starts over with a fresh history.

use anyhow::{Context, Result};
use tracing::{info, warn};

use foldsync_core::config::FolderConfig;
use foldsync_core::domain::{NewFolder, SyncedFolder};
use foldsync_core::ports::IChangeJournal;

/// Brings the journal in line with `configured`, returning folders in config order
pub async fn reconcile_folders(
    journal: &dyn IChangeJournal,
    configured: &[FolderConfig],
) -> Result<Vec<SyncedFolder>> {
    for existing in journal.list_folders().await? {
        if !configured.iter().any(|c| c.name == existing.name) {
            info!(folder = %existing.name, "Folder removed from configuration, dropping its state");
            journal.remove_folder(existing.id).await?;
        }
    }

    let mut folders = Vec::with_capacity(configured.len());
    for entry in configured {
        if let Some(existing) = journal.get_folder_by_name(&entry.name).await? {
            if existing.local_root == entry.local_root && existing.remote_root == entry.remote_root {
                folders.push(existing);
                continue;
            }
            warn!(
                folder = %entry.name,
                "Folder roots changed, discarding previous sync history"
            );
            journal.remove_folder(existing.id).await?;
        }

        let folder = journal
            .add_folder(&NewFolder::new(
                entry.name.clone(),
                entry.local_root.clone(),
                entry.remote_root.clone(),
            ))
            .await
            .with_context(|| format!("Failed to register folder {}", entry.name))?;
        info!(
            folder = %folder.name,
            local_root = %folder.local_root.display(),
            remote_root = %folder.remote_root,
            "Folder registered"
        );
        folders.push(folder);
    }

    Ok(folders)
}
