use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::remote::command_file::{take_commands, CommandFileWatcher};
use crate::remote::commands::RemoteCommand;
use crate::remote::signals::spawn_signal_listener;

/// Funnels commands from the command file and from signals into one queue
/// drained by the session loop.
pub struct RemoteControl {
    command_file: PathBuf,
    sender: UnboundedSender<RemoteCommand>,
    receiver: UnboundedReceiver<RemoteCommand>,
    watcher: Option<CommandFileWatcher>,
}

impl RemoteControl {
    pub fn new(command_file: impl Into<PathBuf>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            command_file: command_file.into(),
            sender,
            receiver,
            watcher: None,
        }
    }

    pub fn command_file(&self) -> &Path {
        &self.command_file
    }

    /// Starts the file watcher. Polling still works without it.
    pub fn watch_command_file(&mut self) -> anyhow::Result<()> {
        self.watcher = Some(CommandFileWatcher::new(&self.command_file, self.sender.clone())?);
        Ok(())
    }

    pub fn listen_for_signals(&self) -> anyhow::Result<()> {
        spawn_signal_listener(self.sender.clone())
    }

    /// Commands received since the last call, including any left in the
    /// command file that the watcher has not picked up.
    pub fn poll(&mut self) -> Vec<RemoteCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.receiver.try_recv() {
            commands.push(command);
        }
        commands.extend(take_commands(&self.command_file));
        commands
    }
}
