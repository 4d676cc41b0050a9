use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::video::export_planner::TranscodeInvocation;

/// Result of one transcoder run.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeStatus {
    Success,
    /// Diagnostic text, normally the tool's stderr
    Failure(String),
}

/// Executes a transcode invocation synchronously in its own process.
pub trait Transcoder: Send + Sync {
    fn run(&self, invocation: &TranscodeInvocation) -> TranscodeStatus;
}

/// Runs ffmpeg processes, refusing to start more than four at once.
#[derive(Clone, Default)]
pub struct FfmpegTranscoder {
    active_count: Arc<AtomicUsize>,
}

impl FfmpegTranscoder {
    const MAX_PROCESSES: usize = 4;

    pub fn new() -> Self {
        Self::default()
    }
}

impl Transcoder for FfmpegTranscoder {
    fn run(&self, invocation: &TranscodeInvocation) -> TranscodeStatus {
        // Reserve a slot before spawning
        let previous = self.active_count.fetch_add(1, Ordering::SeqCst);
        if previous >= Self::MAX_PROCESSES {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
            return TranscodeStatus::Failure(format!(
                "Cannot execute transcoder: {} processes already running (max: {})",
                previous,
                Self::MAX_PROCESSES
            ));
        }

        log::debug!("Executing transcoder, active count: {}", previous + 1);
        log::info!("Export command: {}", invocation);

        let result = Command::new(&invocation.program)
            .args(&invocation.args)
            .output();

        self.active_count.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(output) if output.status.success() => TranscodeStatus::Success,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                log::debug!("Transcoder exited with {}", output.status);
                TranscodeStatus::Failure(stderr)
            }
            Err(e) => TranscodeStatus::Failure(format!(
                "Failed to run {}: {}",
                invocation.program.display(),
                e
            )),
        }
    }
}
