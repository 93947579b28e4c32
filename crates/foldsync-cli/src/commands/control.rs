//! `foldsync pause`, `foldsync resume` and `foldsync rescan`

use anyhow::Result;

use foldsync_ipc::Request;

use super::CommandContext;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Pause,
    Resume,
    Rescan,
}

impl ControlAction {
    fn request(self, folder: String) -> Request {
        match self {
            ControlAction::Pause => Request::Pause { folder },
            ControlAction::Resume => Request::Resume { folder },
            ControlAction::Rescan => Request::ForceRescan { folder },
        }
    }

    fn applied_message(self, folder: &str) -> String {
        match self {
            ControlAction::Pause => format!("Folder {folder} paused"),
            ControlAction::Resume => format!("Folder {folder} resumed"),
            ControlAction::Rescan => format!("Rescan of {folder} requested"),
        }
    }

    fn no_op_message(self, folder: &str) -> String {
        match self {
            ControlAction::Pause => format!("Folder {folder} is already paused"),
            ControlAction::Resume => format!("Folder {folder} is not paused"),
            ControlAction::Rescan => format!("Rescan of {folder} is already pending"),
        }
    }
}

pub struct ControlCommand {
    action: ControlAction,
    folder: String,
}

impl ControlCommand {
    pub fn new(action: ControlAction, folder: String) -> Self {
        Self { action, folder }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut client = ctx.connect().await?;
        let request = self.action.request(self.folder.clone());
        let outcome = client.command(&request).await?;

        ctx.out.ack(
            outcome,
            &self.action.applied_message(&self.folder),
            &self.action.no_op_message(&self.folder),
            serde_json::json!({
                "command": request.command(),
                "folder": self.folder,
            }),
        );
        Ok(())
    }
}
