mod core;
mod remote;
mod session;
mod video;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::AppConfig;
use crate::core::time_format::format_time;
use crate::remote::{PidFile, RemoteControl};
use crate::session::ExporterSession;
use crate::video::{FfmpegOpener, FfmpegTranscoder, FfprobeProber, MediaProber, ResolutionProfile};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Trims recorded segments into MJPEG clips for the Structure sampler
#[derive(Parser, Debug)]
#[command(name = "structure-exporter")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export resolution profile (640 or 320), overriding the config
    #[arg(long, value_parser = parse_profile)]
    profile: Option<ResolutionProfile>,

    /// Segment to open at startup; defaults to the first one listed
    file: Option<PathBuf>,
}

fn parse_profile(s: &str) -> Result<ResolutionProfile, String> {
    ResolutionProfile::parse(s).ok_or_else(|| format!("unknown profile '{}', expected 640 or 320", s))
}

/// What a front end would show, on one line.
fn status_line(session: &mut ExporterSession) -> String {
    let segment = session
        .current_segment()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string());
    let position = session.display().map(|d| d.time_label.clone()).unwrap_or_default();

    let mut line = format!(
        "{} {} IN {} OUT {} -> {} | {}",
        segment,
        position,
        format_time(session.in_point()),
        format_time(session.out_point()),
        session.output_name(),
        session.status()
    );
    if session.is_playing() {
        line.push_str(" | playing");
    }
    if let Some(pending) = session.pending_confirmation() {
        line.push_str(&format!(" | confirm? {}", pending.warning));
    }
    if session.exports_running() {
        line.push_str(" | exporting");
    }
    if let Some(image) = session.mirror_image() {
        line.push_str(&format!(" | mirror {}x{}", image.width(), image.height()));
    }
    line
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(profile) = cli.profile {
        config.default_profile = profile;
    }
    config.ensure_directories()?;

    let _pid_file = PidFile::create(&config.pid_file)?;

    let mut remote = RemoteControl::new(&config.command_file);
    if let Err(e) = remote.watch_command_file() {
        log::warn!("Command file watcher unavailable ({}), polling only", e);
    }
    remote.listen_for_signals()?;

    let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(&config.prober_path));
    let opener = FfmpegOpener::new(&config.transcoder_path, prober.clone());
    let mut session = ExporterSession::new(
        config,
        Box::new(opener),
        prober,
        Arc::new(FfmpegTranscoder::new()),
    );

    for entry in session.catalog().entries() {
        log::info!("  {}", entry.display_label());
    }

    match cli.file {
        Some(path) => {
            if let Err(e) = session.load(&path) {
                log::error!("Could not open {}: {}", path.display(), e);
            }
        }
        None => {
            if let Some(Err(e)) = session.next_segment() {
                log::error!("Could not open first segment: {}", e);
            }
        }
    }

    log::info!(
        "Ready. Send commands via {} or signals to PID {}",
        remote.command_file().display(),
        std::process::id()
    );

    let mut last_line = String::new();
    while !session.quit_requested() {
        for command in remote.poll() {
            session.execute(command, Instant::now());
        }
        session.tick(Instant::now());

        let line = status_line(&mut session);
        if line != last_line {
            log::debug!("{}", line);
            last_line = line;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    session.shutdown();
    Ok(())
}
