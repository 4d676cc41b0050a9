use image::RgbImage;
use std::path::Path;
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::error::{PlaybackError, SourceError};
use crate::core::time_format::format_time;
use crate::video::frame::{Frame, FrameObserver};
use crate::video::frame_source::{FrameSource, StreamMetadata};
use crate::video::playback_clock::{LoopRegion, PlaybackClock, StopOutcome};

pub const DEFAULT_SCRUB_DEBOUNCE: Duration = Duration::from_millis(300);

/// The position display is refreshed at 10 Hz, not per frame.
pub const DISPLAY_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// What the position display shows after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub slider_frame: u64,
    pub total_frames: u64,
    pub current_seconds: f64,
    /// `m:ss.cc / m:ss.cc`
    pub time_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubEnd {
    /// Playback was running before the scrub and has been restarted
    Resumed,
    Idle,
}

/// Pauses playback while the user drags through the timeline and resumes it
/// once the seeks have gone quiet.
///
/// Position queries are answered from the metadata cached at load and from
/// the clock's events. The frame source is only locked by operations that
/// stop playback first.
pub struct ScrubController {
    clock: PlaybackClock,
    debounce: Duration,
    last_seek: Option<Instant>,
    was_playing: bool,
    last_refresh: Option<Instant>,
    metadata: Option<StreamMetadata>,
    /// Frame displayed by the last load or seek
    shown: Option<Frame>,
    position: u64,
}

impl ScrubController {
    pub fn new(clock: PlaybackClock, debounce: Duration) -> Self {
        Self {
            clock,
            debounce,
            last_seek: None,
            was_playing: false,
            last_refresh: None,
            metadata: None,
            shown: None,
            position: 0,
        }
    }

    fn lock_source(&self) -> Result<MutexGuard<'_, FrameSource>, SourceError> {
        self.clock.source().lock().map_err(|_| SourceError::NotLoaded)
    }

    /// Stops playback, drops any scrub in progress and opens `path` showing
    /// its first frame.
    pub fn load(&mut self, path: &Path) -> Result<StreamMetadata, SourceError> {
        self.pause();
        self.discard();
        self.metadata = None;
        self.shown = None;
        self.position = 0;

        let (metadata, shown) = {
            let mut source = self.lock_source()?;
            let metadata = source.load(path)?;
            (metadata, source.show(0)?)
        };
        self.metadata = Some(metadata);
        self.shown = shown;
        Ok(metadata)
    }

    /// Stops playback and closes the decoder.
    pub fn release(&mut self) {
        self.pause();
        self.discard();
        self.metadata = None;
        self.shown = None;
        if let Ok(mut source) = self.lock_source() {
            source.set_observer(None);
            source.release();
        }
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.metadata
    }

    pub fn set_loop_region(&self, region: LoopRegion) {
        self.clock.set_loop_region(region);
    }

    /// Installs or removes the frame observer. Waits for the frame being
    /// decoded, if any.
    pub fn set_observer(&self, observer: Option<Box<dyn FrameObserver>>) -> Result<(), SourceError> {
        self.lock_source()?.set_observer(observer);
        Ok(())
    }

    pub fn is_playing(&mut self) -> bool {
        self.clock.is_running()
    }

    fn pause_for_scrub(&mut self, now: Instant) {
        if self.clock.is_running() {
            self.was_playing = true;
            if self.clock.stop() == StopOutcome::TimedOut {
                log::warn!("Scrubbing while the previous decode thread is still winding down");
            }
        }
        self.last_seek = Some(now);
    }

    fn remember_shown(&mut self, shown: Option<Frame>, position: u64) -> Option<Frame> {
        self.clock.clear_latest();
        self.position = position;
        self.shown = shown.clone();
        shown
    }

    /// Stops playback if needed and shows `frame_index` immediately. Every
    /// call restarts the quiescence window.
    pub fn begin_scrub_seek(&mut self, frame_index: u64, now: Instant) -> Result<Option<Frame>, SourceError> {
        self.pause_for_scrub(now);
        let (shown, position) = {
            let mut source = self.lock_source()?;
            let shown = source.show(frame_index)?;
            (shown, source.current_frame())
        };
        log::debug!("Scrub seek to frame {}", position);
        Ok(self.remember_shown(shown, position))
    }

    /// Steps relative to the current frame, with the same pause semantics.
    pub fn step(&mut self, delta: i64, now: Instant) -> Result<Option<Frame>, SourceError> {
        self.pause_for_scrub(now);
        let (shown, position) = {
            let mut source = self.lock_source()?;
            let target = source.step(delta)?;
            (source.show(target)?, target)
        };
        Ok(self.remember_shown(shown, position))
    }

    /// Ends the scrub once the debounce window has passed since the last seek.
    pub fn poll(&mut self, now: Instant) -> Result<Option<ScrubEnd>, PlaybackError> {
        match self.last_seek {
            Some(last) if now.saturating_duration_since(last) >= self.debounce => self.end_scrub().map(Some),
            _ => Ok(None),
        }
    }

    pub fn end_scrub(&mut self) -> Result<ScrubEnd, PlaybackError> {
        self.last_seek = None;
        if std::mem::take(&mut self.was_playing) {
            self.clock.start()?;
            log::debug!("Scrub ended, playback resumed");
            return Ok(ScrubEnd::Resumed);
        }
        Ok(ScrubEnd::Idle)
    }

    /// Forgets any scrub in progress without resuming, e.g. when a new
    /// segment is loaded.
    pub fn discard(&mut self) {
        if self.last_seek.take().is_some() {
            log::debug!("Discarded pending scrub");
        }
        self.was_playing = false;
        self.last_refresh = None;
        self.clock.clear_latest();
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.last_seek = None;
        self.was_playing = false;
        self.clock.start()
    }

    pub fn pause(&mut self) -> StopOutcome {
        self.last_seek = None;
        self.was_playing = false;
        self.clock.stop()
    }

    /// Returns true when playback is running afterwards.
    pub fn toggle(&mut self) -> Result<bool, PlaybackError> {
        if self.clock.is_running() {
            self.pause();
            Ok(false)
        } else {
            self.play()?;
            Ok(true)
        }
    }

    /// The latest delivered frame during or after playback, otherwise the
    /// frame shown by the last load or seek.
    pub fn current_frame(&mut self) -> Result<u64, SourceError> {
        if self.metadata.is_none() {
            return Err(SourceError::NotLoaded);
        }
        Ok(self
            .clock
            .latest_frame()
            .map(|ready| ready.frame_index)
            .unwrap_or(self.position))
    }

    pub fn current_time(&mut self) -> Option<f64> {
        let frame = self.current_frame().ok()?;
        self.metadata.map(|m| m.timestamp_of(frame))
    }

    /// Image of the current frame, for screenshots.
    pub fn current_image(&mut self) -> Option<Arc<RgbImage>> {
        match self.clock.latest_frame() {
            Some(ready) => Some(ready.image),
            None => self.shown.as_ref().map(|frame| frame.image.clone()),
        }
    }

    /// Produces a display snapshot at most every `DISPLAY_REFRESH_INTERVAL`.
    pub fn refresh(&mut self, now: Instant) -> Option<DisplaySnapshot> {
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < DISPLAY_REFRESH_INTERVAL {
                return None;
            }
        }

        let slider_frame = self.current_frame().ok()?;
        let metadata = self.metadata?;
        self.last_refresh = Some(now);

        let current_seconds = metadata.timestamp_of(slider_frame);
        Some(DisplaySnapshot {
            slider_frame,
            total_frames: metadata.total_frames,
            current_seconds,
            time_label: format!(
                "{} / {}",
                format_time(current_seconds),
                format_time(metadata.duration_seconds())
            ),
        })
    }
}
