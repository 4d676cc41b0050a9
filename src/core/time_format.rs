use std::path::Path;

// Guards against 0.29 * 100.0 == 28.999999999999996 style truncation.
const EPSILON: f64 = 1e-6;

fn centiseconds(seconds: f64) -> u64 {
    (seconds.max(0.0) * 100.0 + EPSILON).floor() as u64
}

fn milliseconds(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0 + EPSILON).round() as u64
}

/// Display form used by the time label and IN/OUT readouts: `m:ss.cc`.
pub fn format_time(seconds: f64) -> String {
    let total = centiseconds(seconds);
    let minutes = total / 6000;
    let secs = (total / 100) % 60;
    let cs = total % 100;
    format!("{}:{:02}.{:02}", minutes, secs, cs)
}

/// Time code handed to the transcoder for `-ss`: `m:ss.mmm`.
pub fn format_timecode(seconds: f64) -> String {
    let total = milliseconds(seconds);
    let minutes = total / 60_000;
    let secs = (total / 1000) % 60;
    let ms = total % 1000;
    format!("{}:{:02}.{:03}", minutes, secs, ms)
}

/// Filename-safe form without colons: `m-ss`.
pub fn format_compact(seconds: f64) -> String {
    let total = centiseconds(seconds) / 100;
    format!("{}-{:02}", total / 60, total % 60)
}

/// Segment list duration: `m:ss`.
pub fn format_short(seconds: f64) -> String {
    let total = centiseconds(seconds) / 100;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Suggested export name derived from the source file and the marked range,
/// e.g. `segment_003_0-12_to_0-28`.
pub fn suggest_output_name(source: &Path, in_seconds: f64, out_seconds: f64) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("clip");
    format!(
        "{}_{}_to_{}",
        stem,
        format_compact(in_seconds),
        format_compact(out_seconds)
    )
}
