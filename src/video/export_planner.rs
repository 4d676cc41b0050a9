//! Turns a marked IN/OUT range into a validated, frame-accurate transcoder
//! invocation for the Structure clip format (MJPEG `.mov`, tagged `mjpa`,
//! single video stream, no audio, no metadata).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::error::ExportError;
use crate::core::time_format::format_timecode;
use crate::video::processor::{MediaProber, ProbeInfo};

/// How far before the IN point the fast (keyframe-snapped) seek lands.
pub const COARSE_SEEK_LEAD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionProfile {
    #[serde(rename = "640")]
    Vga640,
    #[serde(rename = "320")]
    Qvga320,
}

impl ResolutionProfile {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionProfile::Vga640 => (640, 480),
            ResolutionProfile::Qvga320 => (320, 240),
        }
    }

    /// Longest clip the device loads completely at this resolution.
    pub fn max_duration(self) -> f64 {
        match self {
            ResolutionProfile::Vga640 => 16.0,
            ResolutionProfile::Qvga320 => 66.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "640" | "640x480" => Some(ResolutionProfile::Vga640),
            "320" | "320x240" => Some(ResolutionProfile::Qvga320),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{}x{} (max {} sec)", w, h, self.max_duration())
    }
}

/// Two-stage seek: a fast seek before the input is opened, then an accurate
/// decode-and-discard seek for the remainder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPlan {
    pub coarse: f64,
    pub fine: f64,
}

impl SeekPlan {
    pub fn for_offset(seconds: f64) -> Self {
        let seconds = seconds.max(0.0);
        let coarse = (seconds - COARSE_SEEK_LEAD).max(0.0);
        Self { coarse, fine: seconds - coarse }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    /// None when no segment is loaded
    pub source_path: Option<PathBuf>,
    pub in_seconds: f64,
    pub out_seconds: f64,
    pub profile: ResolutionProfile,
    pub output_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub job_id: Uuid,
    pub source_path: PathBuf,
    pub in_seconds: f64,
    pub out_seconds: f64,
    pub seek: SeekPlan,
    pub profile: ResolutionProfile,
    pub output_path: PathBuf,
}

impl ExportPlan {
    pub fn duration(&self) -> f64 {
        self.out_seconds - self.in_seconds
    }

    pub fn invocation(&self, transcoder_path: &Path) -> TranscodeInvocation {
        let (w, h) = self.profile.dimensions();
        let resolution = format!("{}:{}", w, h);

        let mut args: Vec<String> = vec!["-y".into()];
        args.extend(["-ss".into(), format_timecode(self.seek.coarse)]);
        args.extend(["-i".into(), self.source_path.to_string_lossy().into_owned()]);
        args.extend(["-ss".into(), format_timecode(self.seek.fine)]);
        args.extend(["-t".into(), format!("{:.3}", self.duration())]);
        args.extend([
            "-vf".into(),
            format!(
                "scale={res}:force_original_aspect_ratio=decrease,pad={res}:(ow-iw)/2:(oh-ih)/2:black",
                res = resolution
            ),
        ]);
        for arg in [
            "-c:v", "mjpeg", "-q:v", "3", "-tag:v", "mjpa",
            "-an", "-dn", "-sn", "-map_metadata", "-1", "-map", "0:v:0",
        ] {
            args.push(arg.to_string());
        }
        args.push(self.output_path.to_string_lossy().into_owned());

        TranscodeInvocation {
            program: transcoder_path.to_path_buf(),
            args,
        }
    }
}

/// Fully resolved command line for the transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for TranscodeInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program.display(), self.args.join(" "))
    }
}

/// The range is longer than the device loads reliably.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationWarning {
    pub duration: f64,
    pub max_duration: f64,
}

impl fmt::Display for DurationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Duration ({:.1}s) exceeds recommended max ({}s). Structure may not load all frames.",
            self.duration, self.max_duration
        )
    }
}

/// A plan held back until the caller confirms the duration warning.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    plan: ExportPlan,
    pub warning: DurationWarning,
}

impl PendingConfirmation {
    pub fn confirm(self) -> ExportPlan {
        log::info!("Export {} confirmed despite: {}", self.plan.job_id, self.warning);
        self.plan
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Ready(ExportPlan),
    NeedsConfirmation(PendingConfirmation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputCheck {
    pub info: ProbeInfo,
    pub expected_frames: u64,
    pub fits_profile: bool,
    pub frame_count_matches: bool,
}

impl OutputCheck {
    pub fn is_ok(&self) -> bool {
        self.fits_profile && self.frame_count_matches
    }
}

#[derive(Debug, Clone)]
pub struct ExportPlanner {
    output_directory: PathBuf,
}

impl ExportPlanner {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self { output_directory: output_directory.into() }
    }

    /// Validates `job` (first failure wins) and lays out the seek plan.
    pub fn plan(&self, job: &ExportJob) -> Result<PlanOutcome, ExportError> {
        let source_path = job.source_path.clone().ok_or(ExportError::NoSource)?;

        if job.out_seconds <= job.in_seconds {
            return Err(ExportError::InvalidRange {
                in_seconds: job.in_seconds,
                out_seconds: job.out_seconds,
            });
        }

        let name = job.output_name.trim();
        if name.is_empty() {
            return Err(ExportError::MissingName);
        }

        let plan = ExportPlan {
            job_id: Uuid::new_v4(),
            source_path,
            in_seconds: job.in_seconds,
            out_seconds: job.out_seconds,
            seek: SeekPlan::for_offset(job.in_seconds),
            profile: job.profile,
            output_path: self.output_directory.join(format!("{}.mov", name)),
        };

        log::debug!(
            "Planned export {}: IN {:.3}s, OUT {:.3}s, duration {:.3}s, coarse {:.3}s + fine {:.3}s",
            plan.job_id,
            plan.in_seconds,
            plan.out_seconds,
            plan.duration(),
            plan.seek.coarse,
            plan.seek.fine
        );

        let max_duration = job.profile.max_duration();
        if plan.duration() > max_duration {
            let warning = DurationWarning { duration: plan.duration(), max_duration };
            log::warn!("{}", warning);
            return Ok(PlanOutcome::NeedsConfirmation(PendingConfirmation { plan, warning }));
        }

        Ok(PlanOutcome::Ready(plan))
    }

    /// Probes a finished export and compares it with what the plan asked for.
    pub fn verify_output(&self, prober: &dyn MediaProber, plan: &ExportPlan, source_frame_rate: f64) -> anyhow::Result<OutputCheck> {
        let info = prober.probe(&plan.output_path)?;
        let (max_w, max_h) = plan.profile.dimensions();
        let expected_frames = (plan.duration() * source_frame_rate).round() as u64;

        Ok(OutputCheck {
            fits_profile: info.width <= max_w && info.height <= max_h,
            frame_count_matches: info.frame_count.abs_diff(expected_frames) <= 1,
            expected_frames,
            info,
        })
    }
}
