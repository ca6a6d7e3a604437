//! One end-to-end conversion, run on a background thread.
//!
//! The worker probes the duration, supervises FFmpeg, turns its stderr into
//! log and progress items and pushes them through the relay. It never touches
//! presentation state.

use crate::error::ConvertError;
use crate::ffmpeg::{self, Supervisor};
use crate::probe::probe_duration_seconds;
use crate::progress::{parse_line, DiagnosticLine, ProgressTracker};
use crate::relay::RelaySender;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// One conversion. Paths are fixed when the job is created; the duration is
/// `0.0` until the worker has probed the input, and stays `0.0` if the probe
/// found nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output_folder: PathBuf,
    pub output: PathBuf,
    pub total_duration: f64,
}

impl ConversionJob {
    /// Output goes next to the input with the same stem and `.mp4`.
    pub fn for_input(input: &Path) -> Self {
        let output_folder = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let stem = input.file_stem().unwrap_or(input.as_os_str());
        let mut name = stem.to_os_string();
        name.push(".mp4");
        Self {
            output: output_folder.join(name),
            output_folder,
            input: input.to_path_buf(),
            total_duration: 0.0,
        }
    }

    pub fn with_duration(self, total_duration: f64) -> Self {
        Self {
            total_duration,
            ..self
        }
    }
}

/// Summary of a successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub output: PathBuf,
    pub total_duration: f64,
    pub wall_time: Duration,
    pub output_bytes: u64,
}

/// Everything a job needs from the caller besides the job itself.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub supervisor: Supervisor,
    pub ffmpeg_override: Option<PathBuf>,
}

/// Run `job` to completion on the current thread. Holds the supervisor slot
/// for the whole run. Once `cancel` is set the job stops at the next check
/// and pushes nothing more.
pub fn run_job(
    job: &ConversionJob,
    ctx: &JobContext,
    cancel: &AtomicBool,
    relay: &RelaySender,
) -> Result<JobReport, ConvertError> {
    let slot = ctx.supervisor.acquire()?;
    let outcome = convert(job, ctx, cancel, &slot, relay);

    match &outcome {
        Ok(_) => {}
        Err(ConvertError::Cancelled) => {
            tracing::info!(input = %job.input.display(), "conversion cancelled");
            return outcome;
        }
        Err(err) => {
            tracing::warn!(input = %job.input.display(), error = %err, "conversion failed");
            relay.log(format!("Error during conversion: {err}"));
            relay.log(format!("Error details: {err:?}"));
        }
    }
    relay.progress(100.0);
    outcome
}

fn convert(
    job: &ConversionJob,
    ctx: &JobContext,
    cancel: &AtomicBool,
    slot: &ffmpeg::ActiveJob,
    relay: &RelaySender,
) -> Result<JobReport, ConvertError> {
    let tools = ffmpeg::resolve_tools(ctx.ffmpeg_override.as_deref())?;
    relay.log(format!("Using FFmpeg at: {}", tools.ffmpeg.display()));

    let total_duration = probe_duration_seconds(&tools, &job.input, cancel, relay)?;
    if cancel.load(Ordering::Relaxed) {
        return Err(ConvertError::Cancelled);
    }
    let job = job.clone().with_duration(total_duration);
    relay.log(format!("Total duration: {total_duration:.3} seconds"));
    if total_duration <= 0.0 {
        relay.log("Duration unknown; progress and remaining time will not be shown");
    }

    relay.log(format!(
        "Writing {} into {}",
        job.output.file_name().unwrap_or_default().to_string_lossy(),
        job.output_folder.display()
    ));
    relay.log("Starting conversion with optimized settings...");
    // `-y` overwrites the output, so nothing may be launched after a cancel.
    if cancel.load(Ordering::Relaxed) {
        return Err(ConvertError::Cancelled);
    }
    let started = Instant::now();
    let mut tracker = ProgressTracker::new(job.total_duration);
    let args = ffmpeg::encode_args(&job.input, &job.output);

    let outcome = slot.run(
        &tools,
        &args,
        cancel,
        |line| line.contains("time="),
        |line| handle_line(line, &mut tracker, relay),
    );

    // A cancel that lands after the last line still wins over the exit status.
    if cancel.load(Ordering::Relaxed) {
        return Err(ConvertError::Cancelled);
    }
    let outcome = outcome?;

    if !outcome.stdout.trim().is_empty() {
        relay.log(format!("Final stdout: {}", outcome.stdout.trim_end()));
    }

    let wall_time = started.elapsed();
    let output_bytes = std::fs::metadata(&job.output)?.len();
    relay.log(format!(
        "Conversion completed in {:.1} seconds",
        wall_time.as_secs_f64()
    ));
    relay.log(format!(
        "Final file size: {:.2} MB",
        output_bytes as f64 / (1024.0 * 1024.0)
    ));
    relay.log("Conversion completed successfully!");

    Ok(JobReport {
        output: job.output,
        total_duration: job.total_duration,
        wall_time,
        output_bytes,
    })
}

fn handle_line(line: &str, tracker: &mut ProgressTracker, relay: &RelaySender) {
    match parse_line(line) {
        Ok(DiagnosticLine::Progress { elapsed }) => {
            let update = tracker.observe(elapsed);
            if let Some(text) = update.log {
                relay.log(text);
            }
            if let Some(pct) = update.bar {
                relay.progress(pct);
            }
        }
        Ok(DiagnosticLine::Unreadable) => {}
        Ok(DiagnosticLine::Info(text)) => relay.log(format!("FFmpeg: {text}")),
        Err(warning) => {
            tracing::debug!(%warning, "skipping diagnostic line");
            relay.log(format!("Error parsing progress: {warning}"));
        }
    }
}

/// A job running on its own thread.
pub struct JobHandle {
    thread: thread::JoinHandle<Result<JobReport, ConvertError>>,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Ask the worker to kill FFmpeg and stop reporting.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> Result<JobReport, ConvertError> {
        self.thread.join().unwrap_or_else(|_| {
            Err(ConvertError::Io(std::io::Error::other(
                "conversion worker panicked",
            )))
        })
    }
}

/// Start `job` on a background thread with a cancel flag of its own.
/// Refuses immediately if the supervisor is already running one.
pub fn spawn_job(
    job: ConversionJob,
    ctx: JobContext,
    relay: RelaySender,
) -> Result<JobHandle, ConvertError> {
    if ctx.supervisor.is_busy() {
        return Err(ConvertError::Busy);
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let thread = thread::Builder::new()
        .name("conversion".into())
        .spawn(move || run_job(&job, &ctx, &flag, &relay))?;
    Ok(JobHandle { thread, cancel })
}
