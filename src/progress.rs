//! Reading progress out of FFmpeg's diagnostic text.
//!
//! FFmpeg has no structured progress channel on stderr, so every pattern the
//! rest of the crate depends on lives here: a line goes in, and either an
//! elapsed media position or plain log text comes out.

use crate::error::ParseWarning;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d+):(\d+)\.(\d+)").unwrap());

/// What a single diagnostic line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticLine {
    /// Whole seconds of source media encoded so far.
    Progress { elapsed: u64 },
    /// `time=` was present but not in a readable form (`time=N/A`).
    Unreadable,
    /// Anything else; shown in the log as-is.
    Info(String),
}

pub fn parse_line(line: &str) -> Result<DiagnosticLine, ParseWarning> {
    if !line.contains("time=") {
        return Ok(DiagnosticLine::Info(line.trim().to_string()));
    }
    let Some(caps) = TIME_RE.captures(line) else {
        return Ok(DiagnosticLine::Unreadable);
    };

    // The fractional part is matched but dropped: elapsed is whole seconds.
    let field = |idx: usize, name: &'static str| -> Result<u64, ParseWarning> {
        caps[idx]
            .parse::<u64>()
            .map_err(|_| ParseWarning::FieldOutOfRange {
                field: name,
                raw: caps[0].to_string(),
            })
    };
    let h = field(1, "hours")?;
    let m = field(2, "minutes")?;
    let s = field(3, "seconds")?;

    let elapsed = h
        .checked_mul(3600)
        .and_then(|v| v.checked_add(m.checked_mul(60)?))
        .and_then(|v| v.checked_add(s))
        .ok_or_else(|| ParseWarning::FieldOutOfRange {
            field: "hours",
            raw: caps[0].to_string(),
        })?;

    Ok(DiagnosticLine::Progress { elapsed })
}

/// `elapsed / total * 100`, clamped to 0..=100. `None` when the total is
/// unknown.
pub fn percentage(elapsed: f64, total_duration: f64) -> Option<f64> {
    if total_duration > 0.0 {
        Some((elapsed * 100.0 / total_duration).clamp(0.0, 100.0))
    } else {
        None
    }
}

/// What a progress marker should produce after throttling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Text for the job log, at 0.01% granularity.
    pub log: Option<String>,
    /// Value for the progress bar, at 0.1% granularity.
    pub bar: Option<f64>,
}

/// Per-job throttle state. Keeps the last logged and last displayed values
/// as hundredths and tenths of a percent.
#[derive(Debug)]
pub struct ProgressTracker {
    total_duration: f64,
    last_logged: Option<i64>,
    last_bar: Option<i64>,
}

impl ProgressTracker {
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            last_logged: None,
            last_bar: None,
        }
    }

    pub fn observe(&mut self, elapsed: u64) -> ProgressUpdate {
        let Some(pct) = percentage(elapsed as f64, self.total_duration) else {
            return ProgressUpdate::default();
        };

        let mut update = ProgressUpdate::default();

        let hundredths = (pct * 100.0).round() as i64;
        if self.last_logged != Some(hundredths) {
            update.log = Some(format!("Progress: {:.2}%", hundredths as f64 / 100.0));
            self.last_logged = Some(hundredths);
        }

        let tenths = (pct * 10.0).round() as i64;
        if self.last_bar != Some(tenths) {
            update.bar = Some(pct);
            self.last_bar = Some(tenths);
        }

        update
    }
}

/// Remaining wall-clock seconds given time spent so far and completion.
/// `None` until some progress has been made.
pub fn estimate_remaining(elapsed_wall: Duration, percentage: f64) -> Option<f64> {
    if percentage <= 0.0 {
        return None;
    }
    let spent = elapsed_wall.as_secs_f64();
    Some(spent / (percentage / 100.0) - spent)
}

pub fn format_eta(remaining: f64) -> String {
    if remaining > 3600.0 {
        format!("{:.1} hours", remaining / 3600.0)
    } else if remaining > 60.0 {
        format!("{:.1} minutes", remaining / 60.0)
    } else {
        format!("{remaining:.0} seconds")
    }
}
