use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Stream facts reported by the prober for one media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub frame_rate: f64,
    pub duration: f64,
    pub codec: String,
    pub stream_count: usize,
    pub has_audio: bool,
}

/// Query-only access to media metadata.
pub trait MediaProber: Send + Sync {
    fn probe(&self, path: &Path) -> anyhow::Result<ProbeInfo>;
}

/// Runs `ffprobe` and parses its JSON report.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    prober_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(prober_path: impl Into<PathBuf>) -> Self {
        Self { prober_path: prober_path.into() }
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, path: &Path) -> anyhow::Result<ProbeInfo> {
        if !path.is_file() {
            return Err(anyhow::anyhow!("No such file: {}", path.display()));
        }

        let output = Command::new(&self.prober_path)
            .arg("-v").arg("quiet")
            .arg("-print_format").arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.prober_path.display(), e))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
        }

        let json_str = String::from_utf8(output.stdout)?;
        parse_probe_json(&json_str)
    }
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_json(json_str: &str) -> anyhow::Result<ProbeInfo> {
    let info: serde_json::Value = serde_json::from_str(json_str)?;

    let empty_vec = vec![];
    let streams = info["streams"].as_array().unwrap_or(&empty_vec);
    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| anyhow::anyhow!("No video stream"))?;

    let has_audio = streams.iter().any(|s| s["codec_type"].as_str() == Some("audio"));

    let number = |v: &serde_json::Value| -> Option<f64> {
        v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64())
    };

    let frame_rate = video["avg_frame_rate"]
        .as_str()
        .and_then(parse_rational)
        .filter(|r| *r > 0.0)
        .or_else(|| video["r_frame_rate"].as_str().and_then(parse_rational))
        .unwrap_or(0.0);

    let duration = number(&video["duration"])
        .or_else(|| number(&info["format"]["duration"]))
        .unwrap_or(0.0);

    let frame_count = number(&video["nb_frames"])
        .map(|n| n as u64)
        .unwrap_or_else(|| (duration * frame_rate).round() as u64);

    Ok(ProbeInfo {
        width: video["width"].as_u64().unwrap_or(0) as u32,
        height: video["height"].as_u64().unwrap_or(0) as u32,
        frame_count,
        frame_rate,
        duration,
        codec: video["codec_name"].as_str().unwrap_or("unknown").to_string(),
        stream_count: streams.len(),
        has_audio,
    })
}

/// Parses ffprobe rationals like `24000/1001`; `0/0` yields None.
fn parse_rational(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 { None } else { Some(num / den) }
        }
        None => s.trim().parse::<f64>().ok(),
    }
}
