use crate::error::ConvertError;
use crate::ffmpeg::{capture_combined, normalize_separators, Tools};
use crate::relay::RelaySender;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::sync::LazyLock;
use std::sync::atomic::AtomicBool;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap());

/// Seconds from the first `Duration: HH:MM:SS.CC` field in `text`.
pub fn parse_duration(text: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(text)?;
    // Two-digit fields always fit.
    let field = |idx: usize| caps[idx].parse::<u32>().unwrap_or(0);
    Some(
        f64::from(field(1)) * 3600.0
            + f64::from(field(2)) * 60.0
            + f64::from(field(3))
            + f64::from(field(4)) / 100.0,
    )
}

/// Total media duration of `input` in seconds, or `0.0` when it cannot be
/// determined. Every problem is written to the job log; the only error is
/// [`ConvertError::Cancelled`], which logs nothing.
pub fn probe_duration_seconds(
    tools: &Tools,
    input: &Path,
    cancel: &AtomicBool,
    log: &RelaySender,
) -> Result<f64, ConvertError> {
    let args: Vec<OsString> = vec!["-i".into(), normalize_separators(input).into()];
    log.log(format!(
        "Running duration command: {} -i {}",
        tools.ffmpeg.display(),
        input.display()
    ));

    let output = match capture_combined(tools, &args, cancel) {
        Ok(output) => output,
        Err(ConvertError::Cancelled) => return Err(ConvertError::Cancelled),
        Err(err) => {
            tracing::warn!(error = ?err, "duration probe failed");
            log.log(format!("Error getting duration: {err}"));
            log.log(format!("Error details: {err:?}"));
            return Ok(0.0);
        }
    };

    Ok(match parse_duration(&output) {
        Some(seconds) => {
            log.log(format!("Video duration: {seconds:.3} seconds"));
            seconds
        }
        None => {
            log.log("Could not find duration in FFmpeg output");
            log.log(format!("FFmpeg output: {output}"));
            0.0
        }
    })
}
