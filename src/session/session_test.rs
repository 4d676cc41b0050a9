#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::core::config::AppConfig;
    use crate::core::error::{ExportError, SourceError};
    use crate::core::segment_index::SegmentIndex;
    use crate::remote::RemoteCommand;
    use crate::session::session::{ExportRequest, ExporterSession};
    use crate::video::export_planner::{ResolutionProfile, TranscodeInvocation};
    use crate::video::export_runner::{ExportOutcome, ExportReport};
    use crate::video::ffmpeg_manager::{TranscodeStatus, Transcoder};
    use crate::video::testing::{probe_info, StaticProber, SyntheticOpener};

    struct RecordingTranscoder {
        invocations: Mutex<Vec<TranscodeInvocation>>,
        status: TranscodeStatus,
    }

    impl Transcoder for RecordingTranscoder {
        fn run(&self, invocation: &TranscodeInvocation) -> TranscodeStatus {
            self.invocations.lock().unwrap().push(invocation.clone());
            self.status.clone()
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        session: ExporterSession,
        transcoder: Arc<RecordingTranscoder>,
    }

    impl Fixture {
        fn segment(&self, name: &str) -> PathBuf {
            self.dir.path().join("segments").join(name)
        }

        /// The index as persisted on disk.
        fn saved_index(&self) -> SegmentIndex {
            SegmentIndex::load(self.segment("segment_index.json"))
        }
    }

    fn fixture_with(total_frames: u64, status: TranscodeStatus) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let segments = dir.path().join("segments");
        fs::create_dir_all(&segments).unwrap();
        for name in ["segment_001.mp4", "segment_002.mp4"] {
            fs::write(segments.join(name), b"").unwrap();
        }

        let config = AppConfig {
            segment_directory: segments.clone(),
            output_directory: dir.path().join("structure"),
            index_file: segments.join("segment_index.json"),
            command_file: dir.path().join("cmd"),
            pid_file: dir.path().join("pid"),
            screenshot_directory: dir.path().join("shots"),
            ..AppConfig::default()
        };

        let transcoder = Arc::new(RecordingTranscoder { invocations: Mutex::new(Vec::new()), status });
        let session = ExporterSession::new(
            config,
            Box::new(SyntheticOpener::new(total_frames, 24.0)),
            Arc::new(StaticProber::new(Some(probe_info(640, 480, 24.0, 10.0)))),
            transcoder.clone(),
        );
        Fixture { dir, session, transcoder }
    }

    fn fixture() -> Fixture {
        fixture_with(240, TranscodeStatus::Success)
    }

    fn wait_for_reports(session: &mut ExporterSession) -> Vec<ExportReport> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let reports = session.tick(Instant::now());
            if !reports.is_empty() || Instant::now() > deadline {
                return reports;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_load_resets_range_and_suggests_name() {
        let mut f = fixture();
        let metadata = f.session.load(&f.segment("segment_001.mp4")).unwrap();

        assert_eq!(metadata.total_frames, 240);
        assert_eq!(f.session.in_point(), 0.0);
        assert_eq!(f.session.out_point(), 10.0);
        assert_eq!(f.session.output_name(), "segment_001_0-00_to_0-10");
        assert_eq!(f.session.status(), "Loaded: segment_001.mp4");
    }

    #[test]
    fn test_load_during_scrub_discards_resume() {
        let mut f = fixture_with(2400, TranscodeStatus::Success);
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        f.session.execute(RemoteCommand::Play, now);
        thread::sleep(Duration::from_millis(100));
        // Scrubbing while playing would resume playback once the seeks go quiet
        f.session.seek(1200, now).unwrap();
        assert!(!f.session.is_playing());

        f.session.load(&f.segment("segment_002.mp4")).unwrap();
        assert!(!f.session.is_playing());

        f.session.tick(now + Duration::from_secs(1));
        assert!(!f.session.is_playing());
        assert_eq!(f.session.display().unwrap().slider_frame, 0);

        // Nothing from the first segment's playback turns up later
        thread::sleep(Duration::from_millis(200));
        f.session.tick(now + Duration::from_secs(2));
        assert_eq!(f.session.display().unwrap().slider_frame, 0);
        assert_eq!(f.session.current_time(), 0.0);
    }

    #[test]
    fn test_load_while_playing_stops_decoding() {
        let mut f = fixture_with(2400, TranscodeStatus::Success);
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();
        f.session.execute(RemoteCommand::Play, now);
        thread::sleep(Duration::from_millis(100));

        f.session.execute(RemoteCommand::NextSegment, now);
        assert_eq!(f.session.current_segment(), Some(f.segment("segment_002.mp4").as_path()));
        assert!(!f.session.is_playing());

        thread::sleep(Duration::from_millis(200));
        f.session.tick(now + Duration::from_secs(1));
        assert_eq!(f.session.display().unwrap().slider_frame, 0);
    }

    #[test]
    fn test_load_failure_clears_segment() {
        let mut f = fixture();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        let err = f.session.load(Path::new("/segments/missing.mp4")).unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable { .. }));
        assert!(f.session.current_segment().is_none());
        assert!(f.session.status().starts_with("Failed to load"));
    }

    #[test]
    fn test_in_out_persist_and_restore() {
        let mut f = fixture();
        let now = Instant::now();
        let first = f.segment("segment_001.mp4");
        f.session.load(&first).unwrap();

        f.session.execute(RemoteCommand::Seek(48), now);
        f.session.execute(RemoteCommand::SetIn, now);
        f.session.execute(RemoteCommand::Seek(120), now);
        f.session.execute(RemoteCommand::SetOut, now);

        assert_eq!(f.session.output_name(), "segment_001_0-02_to_0-05");
        let index = f.saved_index();
        let entry = index.get("segment_001.mp4").unwrap();
        assert_eq!((entry.in_point, entry.out_point), (2.0, 5.0));

        f.session.load(&f.segment("segment_002.mp4")).unwrap();
        assert_eq!((f.session.in_point(), f.session.out_point()), (0.0, 10.0));

        f.session.load(&first).unwrap();
        assert_eq!((f.session.in_point(), f.session.out_point()), (2.0, 5.0));
    }

    #[test]
    fn test_goto_in_and_out() {
        let mut f = fixture();
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();
        f.session.seek(36, now).unwrap();
        f.session.set_in_point().unwrap();
        f.session.seek(200, now).unwrap();

        assert_eq!(f.session.goto_in(now).unwrap(), 36);
        assert_eq!(f.session.goto_out(now).unwrap(), 239);
    }

    #[test]
    fn test_segment_navigation() {
        let mut f = fixture();
        let now = Instant::now();

        f.session.execute(RemoteCommand::NextSegment, now);
        assert_eq!(f.session.current_segment(), Some(f.segment("segment_001.mp4").as_path()));
        f.session.execute(RemoteCommand::NextSegment, now);
        assert_eq!(f.session.current_segment(), Some(f.segment("segment_002.mp4").as_path()));
        f.session.execute(RemoteCommand::NextSegment, now);
        assert_eq!(f.session.current_segment(), Some(f.segment("segment_002.mp4").as_path()));
        f.session.execute(RemoteCommand::PreviousSegment, now);
        assert_eq!(f.session.current_segment(), Some(f.segment("segment_001.mp4").as_path()));
    }

    #[test]
    fn test_marker_commands() {
        let mut f = fixture();
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        for command in [
            RemoteCommand::Seek(24),
            RemoteCommand::Mark,
            RemoteCommand::Mark,
            RemoteCommand::Seek(72),
            RemoteCommand::Mark,
            RemoteCommand::Seek(0),
        ] {
            f.session.execute(command, now);
        }
        assert_eq!(f.saved_index().get("segment_001.mp4").unwrap().markers, vec![1.0, 3.0]);

        assert_eq!(f.session.next_marker(now).unwrap(), Some(1.0));
        assert_eq!(f.session.next_marker(now).unwrap(), Some(3.0));
        assert_eq!(f.session.next_marker(now).unwrap(), None);
        assert_eq!(f.session.previous_marker(now).unwrap(), Some(1.0));

        f.session.execute(RemoteCommand::Seek(30), now);
        assert_eq!(f.session.remove_nearest_marker().unwrap(), Some(1.0));
        assert_eq!(f.saved_index().get("segment_001.mp4").unwrap().markers, vec![3.0]);
    }

    #[test]
    fn test_export_without_source() {
        let mut f = fixture();
        assert_eq!(f.session.export(None), Err(ExportError::NoSource));
        assert!(f.session.status().starts_with("Error"));
    }

    #[test]
    fn test_export_invalid_range_and_missing_name() {
        let mut f = fixture();
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        f.session.seek(120, now).unwrap();
        f.session.set_in_point().unwrap();
        f.session.seek(24, now).unwrap();
        f.session.set_out_point().unwrap();
        assert!(matches!(f.session.export(None), Err(ExportError::InvalidRange { .. })));

        f.session.set_in_point().unwrap();
        f.session.seek(48, now).unwrap();
        f.session.set_out_point().unwrap();
        assert_eq!(f.session.export(Some("   ".to_string())), Err(ExportError::MissingName));
        assert!(f.transcoder.invocations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_export_reports_success() {
        let mut f = fixture();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        let request = f.session.export(Some("intro".to_string())).unwrap();
        let ExportRequest::Committed(job_id) = request else {
            panic!("expected a committed export");
        };
        assert!(f.session.exports_running());

        let reports = wait_for_reports(&mut f.session);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job_id, job_id);
        let expected = f.dir.path().join("structure").join("intro.mov");
        assert_eq!(reports[0].outcome, ExportOutcome::Success(expected.clone()));
        assert_eq!(f.session.status(), format!("Exported: {}", expected.display()));

        let invocations = f.transcoder.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].args.last().unwrap(), &expected.to_string_lossy().into_owned());
    }

    #[test]
    fn test_export_failure_carries_diagnostic() {
        let mut f = fixture_with(240, TranscodeStatus::Failure("moov atom not found".to_string()));
        f.session.load(&f.segment("segment_001.mp4")).unwrap();
        f.session.export(None).unwrap();

        let reports = wait_for_reports(&mut f.session);
        assert_eq!(reports[0].outcome, ExportOutcome::Failure("moov atom not found".to_string()));
        assert_eq!(f.session.status(), "Export failed:\nmoov atom not found");
    }

    #[test]
    fn test_long_export_needs_confirmation() {
        let mut f = fixture_with(24 * 40, TranscodeStatus::Success);
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        assert_eq!(f.session.export(None).unwrap(), ExportRequest::AwaitingConfirmation);
        assert!(f.session.pending_confirmation().is_some());
        assert!(f.transcoder.invocations.lock().unwrap().is_empty());

        f.session.execute(RemoteCommand::Confirm, now);
        assert!(f.session.pending_confirmation().is_none());
        assert_eq!(wait_for_reports(&mut f.session).len(), 1);

        // Nothing left to confirm
        assert!(f.session.confirm_export().is_none());

        // 40s fits the 320x240 limit
        f.session.execute(RemoteCommand::Profile(ResolutionProfile::Qvga320), now);
        assert!(matches!(f.session.export(None).unwrap(), ExportRequest::Committed(_)));
        assert_eq!(wait_for_reports(&mut f.session).len(), 1);
        assert_eq!(f.transcoder.invocations.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_screenshot_saves_current_frame() {
        let mut f = fixture();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();
        f.session.seek(12, Instant::now()).unwrap();

        let path = f.session.screenshot().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("structure_exporter_") && name.ends_with(".png"));
        assert_eq!(name.len(), "structure_exporter_HHMMSS.png".len());

        let shots = f.dir.path().join("shots");
        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(0, 0)[0], 12);
        assert!(shots.join("structure_exporter_latest.png").exists());
        assert_eq!(
            fs::read_to_string(shots.join("structure_exporter_screenshot_path.txt")).unwrap(),
            path.to_string_lossy()
        );
    }

    #[test]
    fn test_screenshot_without_frame_fails() {
        let mut f = fixture();
        assert!(f.session.screenshot().is_err());
    }

    #[test]
    fn test_mirror_toggle() {
        let mut f = fixture();
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        assert!(f.session.toggle_mirror().unwrap());
        f.session.seek(10, now).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.session.mirror_image().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(f.session.mirror_image().unwrap().dimensions(), (3840, 1080));

        assert!(!f.session.toggle_mirror().unwrap());
        assert!(f.session.mirror_image().is_none());
    }

    #[test]
    fn test_tick_refreshes_display() {
        let mut f = fixture();
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();
        f.session.seek(36, now).unwrap();

        f.session.tick(now);
        let display = f.session.display().unwrap();
        assert_eq!(display.slider_frame, 36);
        assert_eq!(display.time_label, "0:01.50 / 0:10.00");
    }

    #[test]
    fn test_play_pause_and_quit() {
        let mut f = fixture_with(2400, TranscodeStatus::Success);
        let now = Instant::now();
        f.session.load(&f.segment("segment_001.mp4")).unwrap();

        f.session.execute(RemoteCommand::Play, now);
        assert!(f.session.is_playing());
        f.session.execute(RemoteCommand::Play, now);
        assert!(f.session.is_playing());
        f.session.execute(RemoteCommand::Pause, now);
        assert!(!f.session.is_playing());
        f.session.execute(RemoteCommand::Toggle, now);
        assert!(f.session.is_playing());

        f.session.execute(RemoteCommand::Quit, now);
        assert!(f.session.quit_requested());
        f.session.shutdown();
        assert!(!f.session.is_playing());
    }
}
