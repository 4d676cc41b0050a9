use image::RgbImage;
use std::sync::Arc;

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    /// Presentation time in seconds
    pub timestamp: f64,
    pub image: Arc<RgbImage>,
}

/// Receives every frame the frame source reads. Called from whichever thread
/// is reading, including the decode thread during playback, so it must return
/// quickly or it stalls pacing.
pub trait FrameObserver: Send {
    fn on_frame(&mut self, frame: Frame);
}

impl<F> FrameObserver for F
where
    F: FnMut(Frame) + Send,
{
    fn on_frame(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Emitted by the decode thread for every delivered frame. Carries the image
/// so consumers never reach into the frame source while it is decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReady {
    pub frame_index: u64,
    pub timestamp: f64,
    pub image: Arc<RgbImage>,
}
