use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::video::frame::{Frame, FrameObserver};

/// Side-by-side stereo output: two 1920x1080 eye panels.
pub const EYE_WIDTH: u32 = 1920;
pub const EYE_HEIGHT: u32 = 1080;
pub const STEREO_WIDTH: u32 = EYE_WIDTH * 2;

/// Receives composed stereo images.
pub trait MirrorSink: Send {
    fn present(&mut self, image: RgbImage);
}

/// Keeps only the most recent composed image.
#[derive(Clone, Default)]
pub struct LatestImageSink {
    latest: Arc<Mutex<Option<Arc<RgbImage>>>>,
}

impl LatestImageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }
}

impl MirrorSink for LatestImageSink {
    fn present(&mut self, image: RgbImage) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(Arc::new(image));
        }
    }
}

/// Scales `frame` to fit an eye panel, centered on black.
pub fn letterbox(frame: &RgbImage) -> RgbImage {
    let mut eye = RgbImage::from_pixel(EYE_WIDTH, EYE_HEIGHT, Rgb([0, 0, 0]));
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return eye;
    }

    let scale = (EYE_WIDTH as f64 / w as f64).min(EYE_HEIGHT as f64 / h as f64);
    let new_w = ((w as f64 * scale) as u32).clamp(1, EYE_WIDTH);
    let new_h = ((h as f64 * scale) as u32).clamp(1, EYE_HEIGHT);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let x = (EYE_WIDTH - new_w) / 2;
    let y = (EYE_HEIGHT - new_h) / 2;
    imageops::replace(&mut eye, &resized, x as i64, y as i64);
    eye
}

/// The same letterboxed frame for both eyes.
pub fn compose_stereo(frame: &RgbImage) -> RgbImage {
    let eye = letterbox(frame);
    let mut stereo = RgbImage::new(STEREO_WIDTH, EYE_HEIGHT);
    imageops::replace(&mut stereo, &eye, 0, 0);
    imageops::replace(&mut stereo, &eye, EYE_WIDTH as i64, 0);
    stereo
}

/// Frame observer that hands frames to a compositing thread. Frames arriving
/// while the previous one is still being composed are dropped so the decode
/// thread never waits on the mirror.
pub struct StereoMirror {
    frames: SyncSender<Frame>,
    dropped: u64,
}

impl StereoMirror {
    pub fn spawn(mut sink: Box<dyn MirrorSink>) -> std::io::Result<Self> {
        let (frames, frame_rx) = mpsc::sync_channel::<Frame>(1);

        thread::Builder::new()
            .name("stereo-mirror".to_string())
            .spawn(move || {
                let mut presented = 0u64;
                while let Ok(frame) = frame_rx.recv() {
                    sink.present(compose_stereo(&frame.image));
                    presented += 1;
                }
                log::debug!("Stereo mirror stopped after {} frames", presented);
            })?;

        log::info!("Stereo mirror enabled ({}x{})", STEREO_WIDTH, EYE_HEIGHT);
        Ok(Self { frames, dropped: 0 })
    }
}

impl FrameObserver for StereoMirror {
    fn on_frame(&mut self, frame: Frame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    log::debug!("Mirror busy, {} frames skipped so far", self.dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_letterbox_4_3_gets_side_bars() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([200, 10, 10]));
        let eye = letterbox(&frame);

        assert_eq!(eye.dimensions(), (EYE_WIDTH, EYE_HEIGHT));
        // 640x480 scales to 1440x1080, leaving 240px bars
        assert_eq!(eye.get_pixel(100, 540), &Rgb([0, 0, 0]));
        assert_eq!(eye.get_pixel(1800, 540), &Rgb([0, 0, 0]));
        assert_eq!(eye.get_pixel(960, 540), &Rgb([200, 10, 10]));
    }

    #[test]
    fn test_letterbox_wide_gets_top_bars() {
        let frame = RgbImage::from_pixel(3840, 1080, Rgb([10, 200, 10]));
        let eye = letterbox(&frame);
        assert_eq!(eye.get_pixel(960, 10), &Rgb([0, 0, 0]));
        assert_eq!(eye.get_pixel(960, 540), &Rgb([10, 200, 10]));
    }

    #[test]
    fn test_stereo_panels_match() {
        let mut frame = RgbImage::from_pixel(320, 240, Rgb([0, 0, 250]));
        frame.put_pixel(0, 0, Rgb([255, 255, 255]));
        let stereo = compose_stereo(&frame);

        assert_eq!(stereo.dimensions(), (STEREO_WIDTH, EYE_HEIGHT));
        for (x, y) in [(960, 540), (300, 10), (1700, 900)] {
            assert_eq!(stereo.get_pixel(x, y), stereo.get_pixel(x + EYE_WIDTH, y));
        }
    }

    #[test]
    fn test_mirror_presents_frames() {
        let sink = LatestImageSink::new();
        let mut mirror = StereoMirror::spawn(Box::new(sink.clone())).unwrap();
        mirror.on_frame(Frame {
            index: 0,
            timestamp: 0.0,
            image: Arc::new(RgbImage::from_pixel(64, 36, Rgb([1, 2, 3]))),
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.latest().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let image = sink.latest().expect("mirror produced an image");
        assert_eq!(image.dimensions(), (STEREO_WIDTH, EYE_HEIGHT));
    }
}
