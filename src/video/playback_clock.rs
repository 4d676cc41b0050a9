// =============================================================================
// PLAYBACK CLOCK - PACES FRAME DELIVERY AGAINST WALL-CLOCK TIME
// =============================================================================
//
// One dedicated decode thread reads frames from the shared FrameSource and
// delivers them on absolute deadlines (next_target += 1/fps), so scheduling
// jitter never accumulates into drift. When it falls more than a frame behind
// it resynchronizes instead of bursting to catch up.
//
// The UI side never touches decode state: every delivered frame is announced
// as a FrameReady event and the UI reads only the latest one.
//
// =============================================================================

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::error::{LoopRegionError, PlaybackError, SourceError};
use crate::video::frame::FrameReady;
use crate::video::frame_source::{FrameSource, ReadOutcome, SharedFrameSource, StreamMetadata};

/// Playback range. `out_seconds == 0.0` means "until end of media".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopRegion {
    in_seconds: f64,
    out_seconds: f64,
}

impl LoopRegion {
    pub fn new(in_seconds: f64, out_seconds: f64) -> Result<Self, LoopRegionError> {
        if in_seconds < 0.0 {
            return Err(LoopRegionError::NegativeIn(in_seconds));
        }
        if out_seconds != 0.0 && out_seconds <= in_seconds {
            return Err(LoopRegionError::OutBeforeIn { in_seconds, out_seconds });
        }
        Ok(Self { in_seconds, out_seconds })
    }

    pub fn is_active(&self) -> bool {
        self.out_seconds > 0.0
    }

    pub fn should_wrap(&self, timestamp: f64) -> bool {
        self.is_active() && timestamp >= self.out_seconds
    }
}

/// Absolute-deadline frame scheduler.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Duration,
    next_target: Instant,
}

impl FrameScheduler {
    pub fn new(frame_rate: f64, start: Instant) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / frame_rate),
            next_target: start,
        }
    }

    /// Time left until the next frame is due, or None when already due.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        let remaining = self.next_target.saturating_duration_since(now);
        if remaining.is_zero() { None } else { Some(remaining) }
    }

    /// Moves to the next deadline after a frame was delivered. Returns true
    /// when the schedule had slipped by more than one interval and was reset.
    pub fn advance(&mut self, now: Instant) -> bool {
        self.next_target += self.interval;
        if now.saturating_duration_since(self.next_target) > self.interval {
            self.next_target = now;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Frame(FrameReady),
    /// The cursor jumped back, to the IN point or to the start of media
    Wrapped { from_frame: u64, to_frame: u64 },
    /// Decoding failed and the decode thread stopped
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Joined,
    /// The thread did not exit in time and was left to finish on its own
    TimedOut,
}

struct DecodeWorker {
    stop_tx: mpsc::Sender<()>,
    /// Disconnects when the thread exits
    done_rx: mpsc::Receiver<()>,
    /// Events of this run only; dropped with the worker so a detached thread
    /// cannot reach later consumers
    events: mpsc::Receiver<PlaybackEvent>,
    handle: JoinHandle<()>,
}

pub struct PlaybackClock {
    source: SharedFrameSource,
    loop_region: Arc<Mutex<LoopRegion>>,
    join_timeout: Duration,
    worker: Option<DecodeWorker>,
    /// Events drained from a finished worker, not yet polled
    backlog: Vec<PlaybackEvent>,
    latest: Option<FrameReady>,
}

impl PlaybackClock {
    pub fn new(source: SharedFrameSource, join_timeout: Duration) -> Self {
        Self {
            source,
            loop_region: Arc::new(Mutex::new(LoopRegion::default())),
            join_timeout,
            worker: None,
            backlog: Vec::new(),
            latest: None,
        }
    }

    pub fn source(&self) -> &SharedFrameSource {
        &self.source
    }

    pub fn set_loop_region(&self, region: LoopRegion) {
        if let Ok(mut current) = self.loop_region.lock() {
            *current = region;
        }
        log::debug!("Loop region set to {:.3}s..{:.3}s", region.in_seconds, region.out_seconds);
    }

    /// Running means a decode thread exists and has not exited on its own.
    pub fn is_running(&mut self) -> bool {
        self.reap_finished();
        self.worker.is_some()
    }

    fn reap_finished(&mut self) {
        let finished = matches!(
            self.worker.as_ref().map(|w| w.done_rx.try_recv()),
            Some(Err(mpsc::TryRecvError::Disconnected))
        );
        if finished {
            if let Some(worker) = self.worker.take() {
                self.backlog.extend(worker.events.try_iter());
                let _ = worker.handle.join();
                log::debug!("Decode thread had already exited");
            }
        }
    }

    pub fn start(&mut self) -> Result<(), PlaybackError> {
        if self.is_running() {
            return Err(PlaybackError::AlreadyRunning);
        }

        // No decode thread is running, so this lock is uncontended
        let (metadata, start_frame) = {
            let source = self.source.lock().map_err(|_| PlaybackError::NoSource)?;
            let metadata = source.metadata().ok_or(PlaybackError::NoSource)?;
            (metadata, source.cursor())
        };

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let (event_tx, events) = mpsc::channel();
        let source = self.source.clone();
        let loop_region = self.loop_region.clone();

        let handle = thread::Builder::new()
            .name("decode".to_string())
            .spawn(move || {
                let _done = done_tx;
                decode_loop(source, loop_region, metadata, stop_rx, event_tx);
            })?;

        log::info!("Playback started at frame {} ({:.3} fps)", start_frame, metadata.frame_rate);
        self.worker = Some(DecodeWorker { stop_tx, done_rx, events, handle });
        Ok(())
    }

    /// Signals the decode thread and waits for it to exit, at most the join
    /// timeout.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            return StopOutcome::NotRunning;
        };

        let _ = worker.stop_tx.send(());
        let outcome = match worker.done_rx.recv_timeout(self.join_timeout) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Decode thread did not exit within {:?}; continuing without it",
                    self.join_timeout
                );
                StopOutcome::TimedOut
            }
            _ => {
                let _ = worker.handle.join();
                log::info!("Playback stopped");
                StopOutcome::Joined
            }
        };
        self.backlog.extend(worker.events.try_iter());
        outcome
    }

    /// Drains pending events, remembering the most recent frame.
    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let mut events = std::mem::take(&mut self.backlog);
        if let Some(worker) = &self.worker {
            events.extend(worker.events.try_iter());
        }
        for event in &events {
            match event {
                PlaybackEvent::Frame(ready) => self.latest = Some(ready.clone()),
                PlaybackEvent::Wrapped { from_frame, to_frame } => {
                    log::debug!("Playback wrapped from frame {} to {}", from_frame, to_frame)
                }
                PlaybackEvent::Error(message) => log::error!("Playback stopped: {}", message),
            }
        }
        events
    }

    pub fn latest_frame(&mut self) -> Option<FrameReady> {
        self.poll_events();
        self.latest.clone()
    }

    /// Forgets the last delivered frame, e.g. after a manual seek or a load.
    pub fn clear_latest(&mut self) {
        self.poll_events();
        self.latest = None;
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    source: SharedFrameSource,
    loop_region: Arc<Mutex<LoopRegion>>,
    metadata: StreamMetadata,
    stop_rx: mpsc::Receiver<()>,
    events: mpsc::Sender<PlaybackEvent>,
) {
    let mut scheduler = FrameScheduler::new(metadata.frame_rate, Instant::now());
    let mut delivered = 0u64;
    let mut resyncs = 0u64;

    loop {
        // Waiting on the stop channel keeps stop latency under one frame
        let stop = match scheduler.time_until_due(Instant::now()) {
            Some(wait) => !matches!(stop_rx.recv_timeout(wait), Err(mpsc::RecvTimeoutError::Timeout)),
            None => !matches!(stop_rx.try_recv(), Err(mpsc::TryRecvError::Empty)),
        };
        if stop {
            break;
        }

        let region = loop_region.lock().map(|r| *r).unwrap_or_default();
        let result = match source.lock() {
            Ok(mut source) => deliver_next_frame(&mut source, region, &events),
            Err(_) => Err(SourceError::NotLoaded),
        };

        match result {
            Ok(ready) => {
                delivered += 1;
                let _ = events.send(PlaybackEvent::Frame(ready));
            }
            Err(e) => {
                let _ = events.send(PlaybackEvent::Error(e.to_string()));
                break;
            }
        }

        if scheduler.advance(Instant::now()) {
            resyncs += 1;
            log::debug!("Decode fell behind by more than a frame, resynchronized");
        }
    }

    log::debug!("Decode thread exiting ({} frames delivered, {} resyncs)", delivered, resyncs);
}

/// Reads the next frame, applying the loop region and end-of-media wrap.
pub(crate) fn deliver_next_frame(
    source: &mut FrameSource,
    region: LoopRegion,
    events: &mpsc::Sender<PlaybackEvent>,
) -> Result<FrameReady, SourceError> {
    let metadata = source.metadata().ok_or(SourceError::NotLoaded)?;
    let in_frame = metadata.frame_at_or_before(region.in_seconds);

    if region.should_wrap(metadata.timestamp_of(source.cursor())) {
        wrap_to(source, in_frame, events)?;
    }

    let mut frame = match source.read_next()? {
        ReadOutcome::Frame(frame) => frame,
        ReadOutcome::EndOfStream => {
            wrap_to(source, 0, events)?;
            read_required(source)?
        }
    };

    // The decoder's own timestamp is authoritative over frame arithmetic
    if region.should_wrap(frame.timestamp) {
        wrap_to(source, in_frame, events)?;
        frame = read_required(source)?;
    }

    Ok(FrameReady {
        frame_index: frame.index,
        timestamp: frame.timestamp,
        image: frame.image,
    })
}

fn wrap_to(source: &mut FrameSource, target: u64, events: &mpsc::Sender<PlaybackEvent>) -> Result<(), SourceError> {
    let from_frame = source.current_frame();
    let to_frame = source.seek(target)?;
    let _ = events.send(PlaybackEvent::Wrapped { from_frame, to_frame });
    Ok(())
}

fn read_required(source: &mut FrameSource) -> Result<crate::video::frame::Frame, SourceError> {
    match source.read_next()? {
        ReadOutcome::Frame(frame) => Ok(frame),
        ReadOutcome::EndOfStream => Err(SourceError::Decode {
            frame: source.cursor(),
            reason: "stream has no frames".to_string(),
        }),
    }
}
