use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;

use crate::remote::commands::RemoteCommand;

static CLAIMS: AtomicU64 = AtomicU64::new(0);

/// Private name the command file is moved to before it is read.
fn claim_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{}", std::process::id(), CLAIMS.fetch_add(1, Ordering::Relaxed)));
    path.with_file_name(name)
}

/// Takes the commands out of the command file and deletes it. An empty file
/// is left in place, since the writer may not have flushed yet.
///
/// The file is renamed before it is read, so when the watcher and the
/// poller race only one of them gets its contents.
pub fn take_commands(path: &Path) -> Vec<RemoteCommand> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.len() > 0 => {}
        _ => return Vec::new(),
    }

    let claimed = claim_path(path);
    if let Err(e) = std::fs::rename(path, &claimed) {
        if e.kind() != ErrorKind::NotFound {
            log::debug!("Could not claim command file {}: {}", path.display(), e);
        }
        return Vec::new();
    }

    let text = std::fs::read_to_string(&claimed);
    if let Err(e) = std::fs::remove_file(&claimed) {
        log::debug!("Could not remove command file {}: {}", claimed.display(), e);
    }
    let text = match text {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Could not read command file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    log::info!("Remote command: {}", text.trim());
    RemoteCommand::parse_script(&text)
}

/// Watches the command file's directory and forwards commands as soon as the
/// file appears or changes.
pub struct CommandFileWatcher {
    _watcher: RecommendedWatcher,
}

impl CommandFileWatcher {
    pub fn new(path: &Path, sender: UnboundedSender<RemoteCommand>) -> anyhow::Result<Self> {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Command file path has no file name: {}", path.display()))?
            .to_os_string();

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(directory, RecursiveMode::NonRecursive)?;

        let command_path = path.to_path_buf();
        thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                let Ok(Event { kind, paths, .. }) = event else {
                    continue;
                };
                if !matches!(kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                if !paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                    continue;
                }
                for command in take_commands(&command_path) {
                    if sender.send(command).is_err() {
                        return;
                    }
                }
            }
        });

        log::info!("Watching command file {}", path.display());
        Ok(Self { _watcher: watcher })
    }
}
