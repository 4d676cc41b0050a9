//! In-memory decoder used by the playback and scrubbing tests. Each frame's
//! first pixel encodes its index so reads can be checked without real media.

use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::SourceError;
use crate::video::frame::Frame;
use crate::video::frame_source::{DecoderBackend, MediaOpener, StreamMetadata};
use crate::video::processor::{MediaProber, ProbeInfo};

pub struct SyntheticOpener {
    total_frames: u64,
    frame_rate: f64,
    decode_delay: Duration,
}

impl SyntheticOpener {
    pub fn new(total_frames: u64, frame_rate: f64) -> Self {
        Self { total_frames, frame_rate, decode_delay: Duration::ZERO }
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }
}

impl MediaOpener for SyntheticOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderBackend>, SourceError> {
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if name.starts_with("missing") {
            return Err(SourceError::unavailable(path, "no such file"));
        }
        Ok(Box::new(SyntheticDecoder {
            metadata: StreamMetadata::new(self.total_frames, self.frame_rate, 4, 2),
            position: 0,
            decode_delay: self.decode_delay,
        }))
    }
}

struct SyntheticDecoder {
    metadata: StreamMetadata,
    position: u64,
    decode_delay: Duration,
}

impl DecoderBackend for SyntheticDecoder {
    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError> {
        self.position = frame_index;
        Ok(())
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.position >= self.metadata.total_frames {
            return Ok(None);
        }
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        let index = self.position;
        self.position += 1;

        let mut image = RgbImage::new(self.metadata.width, self.metadata.height);
        image.put_pixel(0, 0, Rgb([(index & 0xff) as u8, ((index >> 8) & 0xff) as u8, ((index >> 16) & 0xff) as u8]));
        Ok(Some(Frame {
            index,
            timestamp: self.metadata.timestamp_of(index),
            image: Arc::new(image),
        }))
    }
}

/// Recovers the frame index written into the first pixel.
pub fn frame_marker(frame: &Frame) -> u64 {
    let px = frame.image.get_pixel(0, 0);
    px[0] as u64 | (px[1] as u64) << 8 | (px[2] as u64) << 16
}

/// Answers every probe with the same report, or fails when `info` is None.
/// Files whose name starts with "broken" always fail.
pub struct StaticProber {
    info: Option<ProbeInfo>,
    calls: AtomicUsize,
}

impl StaticProber {
    pub fn new(info: Option<ProbeInfo>) -> Self {
        Self { info, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaProber for StaticProber {
    fn probe(&self, path: &Path) -> anyhow::Result<ProbeInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if name.starts_with("broken") {
            return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
        }
        self.info.clone().ok_or_else(|| anyhow::anyhow!("ffprobe failed for {}", path.display()))
    }
}

pub fn probe_info(width: u32, height: u32, frame_rate: f64, duration: f64) -> ProbeInfo {
    ProbeInfo {
        width,
        height,
        frame_count: (duration * frame_rate).round() as u64,
        frame_rate,
        duration,
        codec: "mjpeg".to_string(),
        stream_count: 1,
        has_audio: false,
    }
}
