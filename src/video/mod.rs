pub mod processor;
pub mod frame;
pub mod frame_source;
pub mod ffmpeg_decoder;
pub mod playback_clock;
pub mod scrub_controller;
pub mod export_planner;
pub mod export_runner;
pub mod ffmpeg_manager;
pub mod stereo_mirror;

#[cfg(test)]
pub(crate) mod testing;

pub use export_planner::ResolutionProfile;
pub use ffmpeg_decoder::FfmpegOpener;
pub use ffmpeg_manager::FfmpegTranscoder;
pub use processor::{FfprobeProber, MediaProber};
