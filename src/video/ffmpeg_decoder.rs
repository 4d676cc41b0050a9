use image::RgbImage;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use crate::core::error::SourceError;
use crate::video::export_planner::SeekPlan;
use crate::video::frame::Frame;
use crate::video::frame_source::{DecoderBackend, MediaOpener, StreamMetadata};
use crate::video::processor::MediaProber;

/// Opens segments by probing them and streaming `rgb24` rawvideo out of an
/// ffmpeg child process.
pub struct FfmpegOpener {
    transcoder_path: PathBuf,
    prober: Arc<dyn MediaProber>,
}

impl FfmpegOpener {
    pub fn new(transcoder_path: impl Into<PathBuf>, prober: Arc<dyn MediaProber>) -> Self {
        Self {
            transcoder_path: transcoder_path.into(),
            prober,
        }
    }
}

impl MediaOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderBackend>, SourceError> {
        if !path.is_file() {
            return Err(SourceError::unavailable(path, "not a readable file"));
        }

        let info = self
            .prober
            .probe(path)
            .map_err(|e| SourceError::unavailable(path, e))?;

        if info.width == 0 || info.height == 0 {
            return Err(SourceError::unavailable(path, "video stream has no dimensions"));
        }

        let metadata = StreamMetadata::new(info.frame_count, info.frame_rate, info.width, info.height);
        log::debug!(
            "Opened {} ({}x{}, codec {}, {} streams, audio: {})",
            path.display(),
            info.width,
            info.height,
            info.codec,
            info.stream_count,
            info.has_audio
        );

        Ok(Box::new(FfmpegDecoder {
            path: path.to_path_buf(),
            transcoder_path: self.transcoder_path.clone(),
            metadata,
            process: None,
            stdout: None,
            position: 0,
        }))
    }
}

struct FfmpegDecoder {
    path: PathBuf,
    transcoder_path: PathBuf,
    metadata: StreamMetadata,
    process: Option<Child>,
    stdout: Option<ChildStdout>,
    /// Frame index the pipe will produce next
    position: u64,
}

impl FfmpegDecoder {
    fn frame_size(&self) -> usize {
        self.metadata.width as usize * self.metadata.height as usize * 3
    }

    fn kill_ffmpeg(&mut self) {
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            log::debug!("Killing decoder process (PID: {:?})", process.id());
            let _ = process.kill();
            let _ = process.wait();
        }
    }

    fn start_pipe(&mut self) -> Result<(), SourceError> {
        // Half a frame early so the target frame survives ffmpeg's pts cut
        let start_seconds = (self.position as f64 - 0.5).max(0.0) / self.metadata.frame_rate;
        let seek = SeekPlan::for_offset(start_seconds);

        let mut cmd = Command::new(&self.transcoder_path);
        cmd.arg("-hide_banner")
            .arg("-loglevel").arg("error")
            .arg("-nostdin");
        if seek.coarse > 0.0 {
            cmd.arg("-ss").arg(format!("{:.6}", seek.coarse));
        }
        cmd.arg("-i").arg(&self.path);
        if seek.fine > 0.0 {
            cmd.arg("-ss").arg(format!("{:.6}", seek.fine));
        }
        cmd.arg("-map").arg("0:v:0")
            .arg("-an")
            .arg("-sn")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgb24")
            .arg("pipe:1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut process = cmd.spawn().map_err(|e| SourceError::Decode {
            frame: self.position,
            reason: format!("failed to spawn {}: {}", self.transcoder_path.display(), e),
        })?;

        log::debug!(
            "Started decoder at frame {} (coarse {:.3}s, fine {:.3}s, PID: {:?})",
            self.position,
            seek.coarse,
            seek.fine,
            process.id()
        );

        self.stdout = process.stdout.take();
        self.process = Some(process);
        Ok(())
    }
}

impl DecoderBackend for FfmpegDecoder {
    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError> {
        self.kill_ffmpeg();
        self.position = frame_index;
        Ok(())
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.position >= self.metadata.total_frames {
            return Ok(None);
        }
        if self.stdout.is_none() {
            self.start_pipe()?;
        }

        let mut buffer = vec![0u8; self.frame_size()];
        let read = match self.stdout.as_mut() {
            Some(stdout) => stdout.read_exact(&mut buffer),
            None => return Ok(None),
        };

        match read {
            Ok(()) => {
                let index = self.position;
                self.position += 1;
                let image = RgbImage::from_raw(self.metadata.width, self.metadata.height, buffer)
                    .ok_or_else(|| SourceError::Decode {
                        frame: index,
                        reason: "frame buffer size mismatch".to_string(),
                    })?;
                Ok(Some(Frame {
                    index,
                    timestamp: self.metadata.timestamp_of(index),
                    image: Arc::new(image),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.kill_ffmpeg();
                Ok(None)
            }
            Err(e) => {
                self.kill_ffmpeg();
                Err(SourceError::Decode {
                    frame: self.position,
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.kill_ffmpeg();
    }
}
