use tokio::sync::{mpsc, watch};

use crate::model::ProjectId;
use crate::reconciler::PanelSnapshot;

/// Command sent from the presentation layer to the controller task.
/// Commands are executed strictly sequentially in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    Refresh,
    Toggle { project: ProjectId, desired: bool },
    Retry { project: ProjectId },
}

/// The presentation layer's handle onto the controller task: a command
/// sender and a watch receiver carrying the latest panel snapshot.
#[derive(Debug, Clone)]
pub struct PanelHandle {
    pub commands: mpsc::UnboundedSender<PanelCommand>,
    pub snapshots: watch::Receiver<PanelSnapshot>,
}

impl PanelHandle {
    /// Sends a command; returns false once the controller task has exited.
    pub fn send(&self, command: PanelCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}
