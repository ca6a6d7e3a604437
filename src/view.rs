//! Presentation state and its terminal rendering.
//!
//! [`ConverterView`] is plain data mutated only by the foreground loop.
//! [`ProgressUi`] mirrors it onto `indicatif` bars.

use crate::error::ConvertError;
use crate::job::JobReport;
use crate::progress::{estimate_remaining, format_eta};
use crate::relay::LogEntry;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const CALCULATING: &str = "Calculating remaining time...";

/// Terminal message shown once a job has ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Success(String),
    Error(String),
    Cancelled,
}

#[derive(Debug)]
pub struct ConverterView {
    log: Vec<LogEntry>,
    progress: f64,
    progress_label: String,
    eta_label: String,
    file_label: String,
    selected: Option<PathBuf>,
    select_enabled: bool,
    run_enabled: bool,
    started: Option<Instant>,
}

impl Default for ConverterView {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            progress: 0.0,
            progress_label: "0%".into(),
            eta_label: String::new(),
            file_label: "No file selected".into(),
            selected: None,
            select_enabled: true,
            run_enabled: false,
            started: None,
        }
    }
}

impl ConverterView {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn progress_label(&self) -> &str {
        &self.progress_label
    }

    pub fn eta_label(&self) -> &str {
        &self.eta_label
    }

    pub fn file_label(&self) -> &str {
        &self.file_label
    }

    #[cfg(test)]
    pub fn select_enabled(&self) -> bool {
        self.select_enabled
    }

    #[cfg(test)]
    pub fn run_enabled(&self) -> bool {
        self.run_enabled
    }

    fn reset_progress(&mut self) {
        self.progress = 0.0;
        self.progress_label = "0%".into();
        self.log.clear();
    }

    /// Returns false while a job is running.
    pub fn select_file(&mut self, path: PathBuf) -> bool {
        if !self.select_enabled {
            return false;
        }
        self.reset_progress();
        self.eta_label.clear();
        self.started = None;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.file_label = format!("Selected: {name}");
        self.selected = Some(path);
        self.run_enabled = true;
        true
    }

    /// Disable both triggers and hand out the file to convert. `None` when
    /// Run is not currently actionable.
    pub fn begin_job(&mut self) -> Option<PathBuf> {
        self.begin_job_at(Instant::now())
    }

    pub fn begin_job_at(&mut self, now: Instant) -> Option<PathBuf> {
        if !self.run_enabled {
            return None;
        }
        let path = self.selected.clone()?;
        self.reset_progress();
        self.select_enabled = false;
        self.run_enabled = false;
        self.started = Some(now);
        self.eta_label = CALCULATING.into();
        Some(path)
    }

    pub fn apply_log(&mut self, entry: LogEntry) {
        self.log.push(entry);
    }

    pub fn apply_progress(&mut self, percentage: f64) {
        self.apply_progress_at(percentage, Instant::now());
    }

    pub fn apply_progress_at(&mut self, percentage: f64, now: Instant) {
        let rounded = (percentage * 10.0).round() / 10.0;
        self.progress = rounded;
        self.progress_label = format!("{rounded:.1}%");

        let Some(started) = self.started else {
            return;
        };
        if let Some(left) = estimate_remaining(now.saturating_duration_since(started), percentage) {
            self.eta_label = format!("Estimated time remaining: {}", format_eta(left));
        }
    }

    /// Re-enable both triggers and describe the outcome.
    pub fn finish_job(&mut self, outcome: &Result<JobReport, ConvertError>) -> Notification {
        self.select_enabled = true;
        self.run_enabled = self.selected.is_some();
        self.started = None;
        match outcome {
            Ok(report) => {
                self.eta_label.clear();
                Notification::Success(format!(
                    "Conversion completed successfully! Saved to {} ({:.2} MB, {:.1}s of media in {:.1}s)",
                    report.output.display(),
                    report.output_bytes as f64 / (1024.0 * 1024.0),
                    report.total_duration,
                    report.wall_time.as_secs_f64()
                ))
            }
            Err(ConvertError::Cancelled) => {
                self.eta_label = "Cancelled".into();
                Notification::Cancelled
            }
            Err(err) => {
                self.eta_label.clear();
                Notification::Error(format!("Conversion failed: {err}"))
            }
        }
    }
}

/// Number of bar steps: one per tenth of a percent.
const BAR_STEPS: u64 = 1000;

pub struct ProgressUi {
    multi: MultiProgress,
    bar: ProgressBar,
    eta: ProgressBar,
}

impl ProgressUi {
    pub fn new(file_label: &str) -> Self {
        let multi = MultiProgress::new();

        let bar = multi.add(ProgressBar::new(BAR_STEPS));
        bar.set_style(
            ProgressStyle::with_template("[{elapsed_precise}]  [{bar:50.cyan/bright-black}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("0%");

        let eta = multi.add(ProgressBar::new_spinner());
        eta.enable_steady_tick(Duration::from_millis(80));
        eta.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["-", "\\", "|", "/", " "]),
        );
        eta.set_message(file_label.to_string());

        Self { multi, bar, eta }
    }

    pub fn print_log(&self, entry: &LogEntry) {
        if self.multi.println(entry.to_string()).is_err() {
            eprintln!("{entry}");
        }
    }

    pub fn sync(&self, view: &ConverterView) {
        self.bar
            .set_position(((view.progress() * 10.0).round() as u64).min(BAR_STEPS));
        self.bar.set_message(view.progress_label().to_string());
        self.eta.set_message(view.eta_label().to_string());
    }

    pub fn finish(&self, view: &ConverterView, notification: &Notification) {
        self.sync(view);
        match notification {
            Notification::Success(_) => {
                self.bar.finish_with_message("100.0%");
                self.eta.finish_with_message("Done");
            }
            Notification::Error(_) => {
                self.bar.abandon_with_message(view.progress_label().to_string());
                self.eta.abandon_with_message("Failed");
            }
            Notification::Cancelled => {
                self.bar.abandon_with_message(view.progress_label().to_string());
                self.eta.abandon_with_message("Cancelled");
            }
        }
    }
}
