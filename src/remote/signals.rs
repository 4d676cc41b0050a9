use std::thread;
use tokio::sync::mpsc::UnboundedSender;

use crate::remote::commands::RemoteCommand;

/// POSIX signals the exporter reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSignal {
    User1,
    User2,
    Interrupt,
    Terminate,
}

impl RemoteSignal {
    pub fn command(self) -> RemoteCommand {
        match self {
            RemoteSignal::User1 => RemoteCommand::Screenshot,
            RemoteSignal::User2 => RemoteCommand::NextSegment,
            RemoteSignal::Interrupt | RemoteSignal::Terminate => RemoteCommand::Quit,
        }
    }
}

/// Translates incoming signals into commands on a dedicated thread.
#[cfg(unix)]
pub fn spawn_signal_listener(sender: UnboundedSender<RemoteCommand>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let (mut usr1, mut usr2, mut int, mut term) = {
        let _guard = rt.enter();
        (
            signal(SignalKind::user_defined1())?,
            signal(SignalKind::user_defined2())?,
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    thread::Builder::new().name("signals".to_string()).spawn(move || {
        rt.block_on(async move {
            loop {
                let received = tokio::select! {
                    Some(_) = usr1.recv() => RemoteSignal::User1,
                    Some(_) = usr2.recv() => RemoteSignal::User2,
                    Some(_) = int.recv() => RemoteSignal::Interrupt,
                    Some(_) = term.recv() => RemoteSignal::Terminate,
                    else => break,
                };
                log::info!("Received {:?}", received);
                if sender.send(received.command()).is_err() {
                    break;
                }
            }
        })
    })?;

    log::debug!("Signal listener started (USR1 screenshot, USR2 next, INT/TERM quit)");
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(sender: UnboundedSender<RemoteCommand>) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new().name("signals".to_string()).spawn(move || {
        rt.block_on(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if sender.send(RemoteSignal::Interrupt.command()).is_err() {
                    break;
                }
            }
        })
    })?;
    Ok(())
}
