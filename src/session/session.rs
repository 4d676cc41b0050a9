use chrono::Local;
use image::ImageFormat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::error::{ExportError, PersistenceError, SourceError};
use crate::core::segment_catalog::SegmentCatalog;
use crate::core::segment_index::SegmentIndex;
use crate::core::time_format::{format_time, suggest_output_name};
use crate::remote::RemoteCommand;
use crate::video::export_planner::{ExportJob, ExportPlan, ExportPlanner, PendingConfirmation, PlanOutcome, ResolutionProfile};
use crate::video::export_runner::{ExportOutcome, ExportReport, ExportRunner};
use crate::video::ffmpeg_manager::Transcoder;
use crate::video::frame_source::{FrameSource, MediaOpener, StreamMetadata};
use crate::video::playback_clock::{LoopRegion, PlaybackClock};
use crate::video::processor::MediaProber;
use crate::video::scrub_controller::{DisplaySnapshot, ScrubController, ScrubEnd};
use crate::video::stereo_mirror::{LatestImageSink, StereoMirror};

/// What `export` did with the marked range.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Committed(Uuid),
    /// Held back until `confirm`
    AwaitingConfirmation,
}

/// The headless exporter: one loaded segment, its IN/OUT range and markers,
/// playback, and exports.
pub struct ExporterSession {
    config: AppConfig,
    scrub: ScrubController,
    index: SegmentIndex,
    catalog: SegmentCatalog,
    planner: ExportPlanner,
    runner: ExportRunner,
    prober: Arc<dyn MediaProber>,
    profile: ResolutionProfile,
    current_segment: Option<PathBuf>,
    in_point: f64,
    out_point: f64,
    output_name: String,
    pending: Option<PendingConfirmation>,
    /// Source frame rate per running export, for verifying the result
    exports_in_flight: HashMap<Uuid, f64>,
    mirror: Option<LatestImageSink>,
    display: Option<DisplaySnapshot>,
    status: String,
    quit_requested: bool,
}

impl ExporterSession {
    pub fn new(
        config: AppConfig,
        opener: Box<dyn MediaOpener>,
        prober: Arc<dyn MediaProber>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let source = FrameSource::new(opener).shared();
        let clock = PlaybackClock::new(source, config.decode_join_timeout());
        let scrub = ScrubController::new(clock, config.scrub_debounce());

        let mut catalog = SegmentCatalog::new(&config.segment_directory, prober.clone());
        if let Err(e) = catalog.rescan() {
            log::warn!("Failed to list segments: {}", e);
        }

        Self {
            index: SegmentIndex::load(&config.index_file),
            planner: ExportPlanner::new(&config.output_directory),
            runner: ExportRunner::new(transcoder, config.transcoder_path.clone()),
            profile: config.default_profile,
            scrub,
            catalog,
            prober,
            current_segment: None,
            in_point: 0.0,
            out_point: 0.0,
            output_name: String::new(),
            pending: None,
            exports_in_flight: HashMap::new(),
            mirror: None,
            display: None,
            status: "Ready".to_string(),
            quit_requested: false,
            config,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn current_segment(&self) -> Option<&Path> {
        self.current_segment.as_deref()
    }

    pub fn in_point(&self) -> f64 {
        self.in_point
    }

    pub fn out_point(&self) -> f64 {
        self.out_point
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn set_profile(&mut self, profile: ResolutionProfile) {
        self.profile = profile;
        self.set_status(format!("Resolution: {}", profile));
        self.check_duration();
    }

    pub fn catalog(&mut self) -> &mut SegmentCatalog {
        &mut self.catalog
    }

    pub fn display(&self) -> Option<&DisplaySnapshot> {
        self.display.as_ref()
    }

    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    pub fn mirror_image(&self) -> Option<Arc<image::RgbImage>> {
        self.mirror.as_ref().and_then(LatestImageSink::latest)
    }

    pub fn is_playing(&mut self) -> bool {
        self.scrub.is_playing()
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn exports_running(&self) -> bool {
        self.runner.is_busy()
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        log::info!("{}", self.status);
    }

    fn metadata(&self) -> Option<StreamMetadata> {
        self.scrub.metadata()
    }

    fn segment_key(&self) -> Option<String> {
        self.current_segment
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Opens `path`, resetting IN/OUT to the whole segment unless the index
    /// remembers a range for it.
    pub fn load(&mut self, path: &Path) -> Result<StreamMetadata, SourceError> {
        self.pending = None;

        let metadata = match self.scrub.load(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.current_segment = None;
                self.in_point = 0.0;
                self.out_point = 0.0;
                self.apply_loop_region();
                self.set_status(format!("Failed to load {}: {}", path.display(), e));
                return Err(e);
            }
        };

        self.current_segment = Some(path.to_path_buf());
        self.in_point = 0.0;
        self.out_point = metadata.duration_seconds();

        if let Some(entry) = self.segment_key().and_then(|key| self.index.get(&key).cloned()) {
            if entry.out_point > entry.in_point && entry.in_point >= 0.0 {
                self.in_point = entry.in_point;
                self.out_point = entry.out_point.min(metadata.duration_seconds());
                log::debug!("Restored IN/OUT from index");
            }
        }

        self.apply_loop_region();
        self.update_output_name();
        let name = self.segment_key().unwrap_or_default();
        self.set_status(format!("Loaded: {}", name));
        Ok(metadata)
    }

    pub fn next_segment(&mut self) -> Option<Result<StreamMetadata, SourceError>> {
        self.rescan_segments();
        let next = self.catalog.next_after(self.current_segment.as_deref())?.to_path_buf();
        Some(self.load(&next))
    }

    pub fn previous_segment(&mut self) -> Option<Result<StreamMetadata, SourceError>> {
        self.rescan_segments();
        let previous = self.catalog.previous_before(self.current_segment.as_deref())?.to_path_buf();
        Some(self.load(&previous))
    }

    fn rescan_segments(&mut self) {
        if let Err(e) = self.catalog.rescan() {
            log::warn!("Failed to list segments: {}", e);
        }
    }

    pub fn current_time(&mut self) -> f64 {
        self.scrub.current_time().unwrap_or(0.0)
    }

    pub fn step(&mut self, frames: i64, now: Instant) -> Result<u64, SourceError> {
        self.scrub.step(frames, now)?;
        self.scrub.current_frame()
    }

    pub fn seek(&mut self, frame: u64, now: Instant) -> Result<u64, SourceError> {
        self.scrub.begin_scrub_seek(frame, now)?;
        self.scrub.current_frame()
    }

    fn seek_to_seconds(&mut self, seconds: f64, now: Instant) -> Result<u64, SourceError> {
        let metadata = self.metadata().ok_or(SourceError::NotLoaded)?;
        self.seek(metadata.frame_at_or_before(seconds), now)
    }

    pub fn play(&mut self) {
        if self.scrub.is_playing() {
            return;
        }
        if let Err(e) = self.scrub.play() {
            self.set_status(format!("Cannot play: {}", e));
        }
    }

    pub fn pause(&mut self) {
        if self.scrub.is_playing() {
            self.scrub.pause();
        }
    }

    pub fn toggle_play(&mut self) {
        if let Err(e) = self.scrub.toggle() {
            self.set_status(format!("Cannot play: {}", e));
        }
    }

    pub fn set_in_point(&mut self) -> Result<(), PersistenceError> {
        self.in_point = self.current_time();
        self.on_range_changed()
    }

    pub fn set_out_point(&mut self) -> Result<(), PersistenceError> {
        self.out_point = self.current_time();
        self.on_range_changed()
    }

    fn on_range_changed(&mut self) -> Result<(), PersistenceError> {
        self.apply_loop_region();
        self.update_output_name();
        self.set_status(format!("IN: {}  OUT: {}", format_time(self.in_point), format_time(self.out_point)));
        self.check_duration();

        match self.segment_key() {
            Some(key) => self.index.set_in_out(&key, self.in_point, self.out_point),
            None => Ok(()),
        }
    }

    fn check_duration(&mut self) {
        let duration = self.out_point - self.in_point;
        if duration > self.profile.max_duration() {
            log::warn!(
                "Duration {} exceeds {}s for {}",
                format_time(duration.abs()),
                self.profile.max_duration(),
                self.profile
            );
        }
    }

    fn apply_loop_region(&mut self) {
        let region = if self.current_segment.is_some() {
            LoopRegion::new(self.in_point, self.out_point).unwrap_or_else(|e| {
                log::warn!("Loop disabled: {}", e);
                LoopRegion::default()
            })
        } else {
            LoopRegion::default()
        };
        self.scrub.set_loop_region(region);
    }

    fn update_output_name(&mut self) {
        if let Some(segment) = &self.current_segment {
            self.output_name = suggest_output_name(segment, self.in_point, self.out_point);
        }
    }

    pub fn goto_in(&mut self, now: Instant) -> Result<u64, SourceError> {
        self.seek_to_seconds(self.in_point, now)
    }

    pub fn goto_out(&mut self, now: Instant) -> Result<u64, SourceError> {
        self.seek_to_seconds(self.out_point, now)
    }

    /// Returns whether a new marker was added at the current time.
    pub fn add_marker(&mut self) -> Result<bool, PersistenceError> {
        let t = self.current_time();
        match self.segment_key() {
            Some(key) => self.index.add_marker(&key, t),
            None => Ok(false),
        }
    }

    pub fn remove_nearest_marker(&mut self) -> Result<Option<f64>, PersistenceError> {
        let t = self.current_time();
        match self.segment_key() {
            Some(key) => self.index.remove_nearest_marker(&key, t),
            None => Ok(None),
        }
    }

    pub fn next_marker(&mut self, now: Instant) -> Result<Option<f64>, SourceError> {
        let t = self.current_time();
        let marker = self.segment_key().and_then(|key| self.index.next_marker_after(&key, t));
        self.go_to_marker(marker, now)
    }

    pub fn previous_marker(&mut self, now: Instant) -> Result<Option<f64>, SourceError> {
        let t = self.current_time();
        let marker = self.segment_key().and_then(|key| self.index.previous_marker_before(&key, t));
        self.go_to_marker(marker, now)
    }

    fn go_to_marker(&mut self, marker: Option<f64>, now: Instant) -> Result<Option<f64>, SourceError> {
        if let Some(t) = marker {
            let metadata = self.metadata().ok_or(SourceError::NotLoaded)?;
            self.seek(metadata.frame_at(t), now)?;
        }
        Ok(marker)
    }

    /// Plans an export of the IN/OUT range. Over-long ranges wait for
    /// `confirm`.
    pub fn export(&mut self, name: Option<String>) -> Result<ExportRequest, ExportError> {
        if let Some(name) = name {
            self.output_name = name;
        }
        self.pending = None;

        let job = ExportJob {
            source_path: self.current_segment.clone(),
            in_seconds: self.in_point,
            out_seconds: self.out_point,
            profile: self.profile,
            output_name: self.output_name.clone(),
        };

        match self.planner.plan(&job) {
            Ok(PlanOutcome::Ready(plan)) => Ok(ExportRequest::Committed(self.commit(plan))),
            Ok(PlanOutcome::NeedsConfirmation(pending)) => {
                self.set_status(format!("{} Send 'confirm' to export anyway.", pending.warning));
                self.pending = Some(pending);
                Ok(ExportRequest::AwaitingConfirmation)
            }
            Err(e) => {
                self.set_status(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    /// Commits the export waiting on a duration warning, if any.
    pub fn confirm_export(&mut self) -> Option<Uuid> {
        let pending = self.pending.take()?;
        Some(self.commit(pending.confirm()))
    }

    fn commit(&mut self, plan: ExportPlan) -> Uuid {
        let frame_rate = self.metadata().map(|m| m.frame_rate).unwrap_or_default();
        let job_id = self.runner.commit(plan);
        self.exports_in_flight.insert(job_id, frame_rate);
        self.set_status("Exporting...");
        job_id
    }

    /// Saves the current frame as `structure_exporter_HHMMSS.png`, plus a
    /// `_latest` copy and a text file naming the capture.
    pub fn screenshot(&mut self) -> anyhow::Result<PathBuf> {
        let image = self
            .scrub
            .current_image()
            .ok_or_else(|| anyhow::anyhow!("No frame to capture"))?;

        let directory = &self.config.screenshot_directory;
        std::fs::create_dir_all(directory)?;
        let timestamp = Local::now().format("%H%M%S");
        let path = directory.join(format!("structure_exporter_{}.png", timestamp));

        image.save_with_format(&path, ImageFormat::Png)?;
        image.save_with_format(directory.join("structure_exporter_latest.png"), ImageFormat::Png)?;
        std::fs::write(
            directory.join("structure_exporter_screenshot_path.txt"),
            path.to_string_lossy().as_bytes(),
        )?;

        self.set_status(format!("Screenshot: {}", path.display()));
        Ok(path)
    }

    /// Turns the stereo mirror on or off. Returns whether it is now on.
    pub fn toggle_mirror(&mut self) -> anyhow::Result<bool> {
        if self.mirror.is_some() {
            self.scrub.set_observer(None)?;
            self.mirror = None;
            self.set_status("Stereo mirror disabled");
            return Ok(false);
        }

        let sink = LatestImageSink::new();
        let mirror = StereoMirror::spawn(Box::new(sink.clone()))?;
        self.scrub.set_observer(Some(Box::new(mirror)))?;
        self.mirror = Some(sink);
        self.set_status("Stereo mirror enabled");
        Ok(true)
    }

    /// Periodic housekeeping: ends finished scrubs, refreshes the position
    /// display and collects export results.
    pub fn tick(&mut self, now: Instant) -> Vec<ExportReport> {
        match self.scrub.poll(now) {
            Ok(Some(ScrubEnd::Resumed)) => log::debug!("Playback resumed after scrub"),
            Ok(_) => {}
            Err(e) => self.set_status(format!("Cannot resume playback: {}", e)),
        }

        if let Some(snapshot) = self.scrub.refresh(now) {
            self.display = Some(snapshot);
        }

        let reports = self.runner.get_completed_results();
        for report in &reports {
            let frame_rate = self.exports_in_flight.remove(&report.job_id);
            match &report.outcome {
                ExportOutcome::Success(path) => {
                    self.set_status(format!("Exported: {}", path.display()));
                    if let Some(frame_rate) = frame_rate.filter(|fps| *fps > 0.0) {
                        self.verify_export(&report.plan, frame_rate);
                    }
                }
                ExportOutcome::Failure(text) => {
                    self.set_status(format!("Export failed:\n{}", text));
                }
            }
        }
        reports
    }

    fn verify_export(&self, plan: &ExportPlan, frame_rate: f64) {
        match self.planner.verify_output(self.prober.as_ref(), plan, frame_rate) {
            Ok(check) if check.is_ok() => log::debug!(
                "Verified {}: {}x{}, {} frames",
                plan.output_path.display(),
                check.info.width,
                check.info.height,
                check.info.frame_count
            ),
            Ok(check) => log::warn!(
                "{} is {}x{} with {} frames, expected at most {:?} and {} frames",
                plan.output_path.display(),
                check.info.width,
                check.info.height,
                check.info.frame_count,
                plan.profile.dimensions(),
                check.expected_frames
            ),
            Err(e) => log::warn!("Could not verify {}: {}", plan.output_path.display(), e),
        }
    }

    /// Runs one remote command. Failures are reported through the status.
    pub fn execute(&mut self, command: RemoteCommand, now: Instant) {
        log::debug!("Executing {:?}", command);
        let name = command_name(&command);

        let result: anyhow::Result<()> = match command {
            RemoteCommand::Screenshot => self.screenshot().map(|_| ()),
            RemoteCommand::NextSegment => match self.next_segment() {
                Some(result) => result.map(|_| ()).map_err(Into::into),
                None => Ok(()),
            },
            RemoteCommand::PreviousSegment => match self.previous_segment() {
                Some(result) => result.map(|_| ()).map_err(Into::into),
                None => Ok(()),
            },
            RemoteCommand::Step(frames) => self.step(frames, now).map(|_| ()).map_err(Into::into),
            RemoteCommand::Play => {
                self.play();
                Ok(())
            }
            RemoteCommand::Pause => {
                self.pause();
                Ok(())
            }
            RemoteCommand::Toggle => {
                self.toggle_play();
                Ok(())
            }
            RemoteCommand::SetIn => self.set_in_point().map_err(Into::into),
            RemoteCommand::SetOut => self.set_out_point().map_err(Into::into),
            RemoteCommand::GotoIn => self.goto_in(now).map(|_| ()).map_err(Into::into),
            RemoteCommand::GotoOut => self.goto_out(now).map(|_| ()).map_err(Into::into),
            RemoteCommand::Seek(frame) => self.seek(frame, now).map(|_| ()).map_err(Into::into),
            RemoteCommand::Mark => self.add_marker().map(|_| ()).map_err(Into::into),
            RemoteCommand::Unmark => self.remove_nearest_marker().map(|_| ()).map_err(Into::into),
            RemoteCommand::NextMark => self.next_marker(now).map(|_| ()).map_err(Into::into),
            RemoteCommand::PreviousMark => self.previous_marker(now).map(|_| ()).map_err(Into::into),
            RemoteCommand::Export(name) => self.export(name).map(|_| ()).map_err(Into::into),
            RemoteCommand::Confirm => {
                if self.confirm_export().is_none() {
                    log::debug!("Nothing to confirm");
                }
                Ok(())
            }
            RemoteCommand::Profile(profile) => {
                self.set_profile(profile);
                Ok(())
            }
            RemoteCommand::Mirror => self.toggle_mirror().map(|_| ()),
            RemoteCommand::Quit => {
                self.quit_requested = true;
                Ok(())
            }
        };

        if let Err(e) = result {
            log::error!("{} failed: {}", name, e);
            self.status = format!("Error: {}", e);
        }
    }

    /// Stops playback and the mirror and releases the decoder.
    pub fn shutdown(&mut self) {
        self.scrub.release();
        self.mirror = None;
        if self.runner.is_busy() {
            log::warn!("Exiting with exports still running");
        }
        log::info!("Session closed");
    }
}

fn command_name(command: &RemoteCommand) -> &'static str {
    match command {
        RemoteCommand::Screenshot => "screenshot",
        RemoteCommand::NextSegment => "next",
        RemoteCommand::PreviousSegment => "prev",
        RemoteCommand::Step(_) => "step",
        RemoteCommand::Play => "play",
        RemoteCommand::Pause => "pause",
        RemoteCommand::Toggle => "toggle",
        RemoteCommand::SetIn => "setin",
        RemoteCommand::SetOut => "setout",
        RemoteCommand::GotoIn => "gotoin",
        RemoteCommand::GotoOut => "gotoout",
        RemoteCommand::Seek(_) => "seek",
        RemoteCommand::Mark => "mark",
        RemoteCommand::Unmark => "unmark",
        RemoteCommand::NextMark => "nextmark",
        RemoteCommand::PreviousMark => "prevmark",
        RemoteCommand::Export(_) => "export",
        RemoteCommand::Confirm => "confirm",
        RemoteCommand::Profile(_) => "profile",
        RemoteCommand::Mirror => "mirror",
        RemoteCommand::Quit => "quit",
    }
}
