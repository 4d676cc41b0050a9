use std::path::PathBuf;
use thiserror::Error;

/// A source file could not be opened or decoded.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("no source loaded")]
    NotLoaded,

    #[error("decode failed at frame {frame}: {reason}")]
    Decode { frame: u64, reason: String },
}

impl SourceError {
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SourceError::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// User-input validation failures from the export planner.
#[derive(Debug, Error, PartialEq)]
pub enum ExportError {
    #[error("no video loaded")]
    NoSource,

    #[error("OUT point ({out_seconds:.3}s) must be after IN point ({in_seconds:.3}s)")]
    InvalidRange { in_seconds: f64, out_seconds: f64 },

    #[error("please enter an output name")]
    MissingName,
}

/// Writing the segment index failed. In-memory state is kept.
#[derive(Debug, Error)]
#[error("failed to persist index to {path}: {source}")]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback already running")]
    AlreadyRunning,

    #[error("no source loaded")]
    NoSource,

    #[error("failed to spawn decode thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LoopRegionError {
    #[error("IN point must not be negative (got {0:.3}s)")]
    NegativeIn(f64),

    #[error("OUT point ({out_seconds:.3}s) must be after IN point ({in_seconds:.3}s)")]
    OutBeforeIn { in_seconds: f64, out_seconds: f64 },
}
