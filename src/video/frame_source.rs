use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::error::SourceError;
use crate::video::frame::{Frame, FrameObserver};

/// Frame rate assumed when the container reports none.
pub const DEFAULT_FRAME_RATE: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMetadata {
    pub total_frames: u64,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl StreamMetadata {
    pub fn new(total_frames: u64, frame_rate: f64, width: u32, height: u32) -> Self {
        let frame_rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        Self { total_frames, frame_rate, width, height }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.total_frames as f64 / self.frame_rate
    }

    pub fn last_frame(&self) -> u64 {
        self.total_frames.saturating_sub(1)
    }

    pub fn timestamp_of(&self, frame_index: u64) -> f64 {
        frame_index as f64 / self.frame_rate
    }

    /// Nearest frame to `seconds`, clamped to the stream.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        let frame = (seconds.max(0.0) * self.frame_rate).round() as u64;
        frame.min(self.last_frame())
    }

    /// Last frame whose timestamp does not pass `seconds`.
    pub fn frame_at_or_before(&self, seconds: f64) -> u64 {
        let frame = (seconds.max(0.0) * self.frame_rate + 1e-6).floor() as u64;
        frame.min(self.last_frame())
    }
}

/// A decoder positioned somewhere in one open media file.
pub trait DecoderBackend: Send {
    fn metadata(&self) -> StreamMetadata;

    /// Positions the decoder so the next `decode_next` returns `frame_index`.
    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError>;

    /// Decodes the frame at the current position and advances by one.
    /// `Ok(None)` signals end of stream.
    fn decode_next(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Opens decoder backends for paths.
pub trait MediaOpener: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderBackend>, SourceError>;
}

#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// Owns the decoder for the currently loaded segment and the read cursor.
pub struct FrameSource {
    opener: Box<dyn MediaOpener>,
    decoder: Option<Box<dyn DecoderBackend>>,
    path: Option<PathBuf>,
    metadata: Option<StreamMetadata>,
    /// Index of the next frame `read_next` returns
    cursor: u64,
    /// Last frame shown or sought to
    current_frame: u64,
    observer: Option<Box<dyn FrameObserver>>,
}

pub type SharedFrameSource = Arc<Mutex<FrameSource>>;

impl FrameSource {
    pub fn new(opener: Box<dyn MediaOpener>) -> Self {
        Self {
            opener,
            decoder: None,
            path: None,
            metadata: None,
            cursor: 0,
            current_frame: 0,
            observer: None,
        }
    }

    pub fn shared(self) -> SharedFrameSource {
        Arc::new(Mutex::new(self))
    }

    /// Opens `path`, releasing any previous decoder first.
    pub fn load(&mut self, path: &Path) -> Result<StreamMetadata, SourceError> {
        if self.decoder.take().is_some() {
            log::debug!("Released decoder for {:?}", self.path);
        }
        self.path = None;
        self.metadata = None;
        self.cursor = 0;
        self.current_frame = 0;

        let decoder = self.opener.open(path)?;
        let metadata = decoder.metadata();
        log::info!(
            "Loaded {} ({} frames @ {:.3} fps, {:.2}s)",
            path.display(),
            metadata.total_frames,
            metadata.frame_rate,
            metadata.duration_seconds()
        );

        self.decoder = Some(decoder);
        self.path = Some(path.to_path_buf());
        self.metadata = Some(metadata);
        Ok(metadata)
    }

    pub fn release(&mut self) {
        self.decoder = None;
        self.path = None;
        self.metadata = None;
        self.cursor = 0;
        self.current_frame = 0;
    }

    pub fn is_loaded(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.metadata
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn set_observer(&mut self, observer: Option<Box<dyn FrameObserver>>) {
        self.observer = observer;
    }

    /// Clamps `frame_index` into the stream and positions the cursor there.
    pub fn seek(&mut self, frame_index: u64) -> Result<u64, SourceError> {
        let metadata = self.metadata.ok_or(SourceError::NotLoaded)?;
        let decoder = self.decoder.as_mut().ok_or(SourceError::NotLoaded)?;

        let target = frame_index.min(metadata.last_frame());
        if target != self.cursor {
            decoder.seek(target)?;
        }
        self.cursor = target;
        self.current_frame = target;
        Ok(target)
    }

    pub fn read_next(&mut self) -> Result<ReadOutcome, SourceError> {
        let metadata = self.metadata.ok_or(SourceError::NotLoaded)?;
        let decoder = self.decoder.as_mut().ok_or(SourceError::NotLoaded)?;

        if self.cursor >= metadata.total_frames {
            return Ok(ReadOutcome::EndOfStream);
        }

        match decoder.decode_next()? {
            Some(frame) => {
                self.current_frame = frame.index;
                self.cursor = frame.index + 1;
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_frame(frame.clone());
                }
                Ok(ReadOutcome::Frame(frame))
            }
            None => {
                // Containers often report a few more frames than they hold
                log::debug!("Decoder ended at frame {} of {}", self.cursor, metadata.total_frames);
                self.cursor = metadata.total_frames;
                Ok(ReadOutcome::EndOfStream)
            }
        }
    }

    /// Seeks to `frame_index`, reads it for display and puts the cursor back
    /// so the next read returns the same frame.
    pub fn show(&mut self, frame_index: u64) -> Result<Option<Frame>, SourceError> {
        let target = self.seek(frame_index)?;
        let shown = match self.read_next()? {
            ReadOutcome::Frame(frame) => Some(frame),
            ReadOutcome::EndOfStream => None,
        };
        self.seek(target)?;
        Ok(shown)
    }

    /// Moves `delta` frames from the current frame, clamping at both ends.
    pub fn step(&mut self, delta: i64) -> Result<u64, SourceError> {
        let target = (self.current_frame as i64).saturating_add(delta).max(0) as u64;
        self.seek(target)
    }
}
