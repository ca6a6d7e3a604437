//! The foreground loop. Sole owner of presentation state; talks to the
//! worker only through the relay and the job handle.

use crate::cli::AppConfig;
use crate::error::ConvertError;
use crate::ffmpeg::Supervisor;
use crate::job::{spawn_job, ConversionJob, JobContext, JobHandle, JobReport};
use crate::relay::Relay;
use crate::tui;
use crate::view::{ConverterView, Notification, ProgressUi};
use anyhow::Result;
use dialoguer::theme::ColorfulTheme;
use signal_hook::consts::SIGINT;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit status for a Ctrl-C outside a job, as a shell reports SIGINT.
const SIGINT_EXIT: i32 = 130;

pub struct App {
    config: AppConfig,
    supervisor: Supervisor,
    relay: Relay,
    view: ConverterView,
    /// Set by Ctrl-C while a job runs.
    interrupted: Arc<AtomicBool>,
    /// True between jobs, where Ctrl-C exits the program.
    idle: Arc<AtomicBool>,
}

impl App {
    /// Installs the Ctrl-C handlers for the lifetime of the process.
    pub fn new(config: AppConfig) -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let idle = Arc::new(AtomicBool::new(true));
        signal_hook::flag::register_conditional_shutdown(SIGINT, SIGINT_EXIT, Arc::clone(&idle))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;
        Ok(Self {
            config,
            supervisor: Supervisor::new(),
            relay: Relay::new(),
            view: ConverterView::new(),
            interrupted,
            idle,
        })
    }

    #[cfg(test)]
    pub fn view(&self) -> &ConverterView {
        &self.view
    }

    /// Convert `input` once. Exits successfully only if the job succeeded.
    pub fn run_single(&mut self, input: PathBuf) -> Result<Notification> {
        self.view.select_file(input);
        self.run_selected()
    }

    /// Prompt for files until the user stops.
    pub fn run_interactive(&mut self) -> Result<Option<Notification>> {
        let theme = ColorfulTheme::default();
        println!("MKV to MP4 Converter");
        let mut last = None;
        loop {
            let Some(input) = tui::select_input_file(&theme)? else {
                return Ok(last);
            };
            self.view.select_file(input);
            if !tui::confirm_run(&theme, self.view.file_label())? {
                continue;
            }
            last = Some(self.run_selected()?);
            if !tui::convert_another(&theme)? {
                return Ok(last);
            }
        }
    }

    fn run_selected(&mut self) -> Result<Notification> {
        let Some(input) = self.view.begin_job() else {
            return Ok(Notification::Error("No file selected".into()));
        };
        let ui = ProgressUi::new(self.view.file_label());
        ui.sync(&self.view);

        let ctx = JobContext {
            supervisor: self.supervisor.clone(),
            ffmpeg_override: self.config.ffmpeg.clone(),
        };
        self.interrupted.store(false, Ordering::Relaxed);
        self.idle.store(false, Ordering::Relaxed);
        let outcome = match spawn_job(ConversionJob::for_input(&input), ctx, self.relay.sender()) {
            Ok(handle) => self.wait_for(&ui, handle),
            Err(err) => Err(err),
        };
        self.idle.store(true, Ordering::Relaxed);

        Ok(self.conclude(&ui, outcome))
    }

    fn wait_for(
        &mut self,
        ui: &ProgressUi,
        handle: JobHandle,
    ) -> Result<JobReport, ConvertError> {
        loop {
            thread::sleep(POLL_INTERVAL);
            if self.interrupted.swap(false, Ordering::Relaxed) {
                handle.cancel();
            }
            let finished = handle.is_finished();
            self.pump(ui);
            if finished {
                return handle.join();
            }
        }
    }

    /// Apply everything the worker has queued since the last tick.
    fn pump(&mut self, ui: &ProgressUi) {
        for entry in self.relay.drain_logs() {
            ui.print_log(&entry);
            self.view.apply_log(entry);
        }
        for pct in self.relay.drain_progress() {
            self.view.apply_progress(pct);
        }
        ui.sync(&self.view);
    }

    fn conclude(
        &mut self,
        ui: &ProgressUi,
        outcome: Result<JobReport, ConvertError>,
    ) -> Notification {
        let note = self.view.finish_job(&outcome);
        ui.finish(&self.view, &note);
        match &note {
            Notification::Success(msg) => println!("{msg}"),
            Notification::Error(msg) => eprintln!("Error: {msg}"),
            Notification::Cancelled => eprintln!("Conversion cancelled."),
        }
        note
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    fn app_with_script(dir: &tempfile::TempDir, conversion_body: &str) -> App {
        let script = format!(
            "#!/bin/sh\n\
             if [ \"$#\" -eq 2 ]; then\n\
             \techo '  Duration: 00:02:00.00, start: 0.000000' >&2\n\
             \texit 1\n\
             fi\n\
             for last; do :; done\n\
             {conversion_body}\n"
        );
        let ffmpeg = dir.path().join("ffmpeg-stub");
        fs::write(&ffmpeg, script).unwrap();
        fs::set_permissions(&ffmpeg, fs::Permissions::from_mode(0o755)).unwrap();
        App::new(AppConfig {
            input: None,
            ffmpeg: Some(ffmpeg),
            verbose: false,
        })
        .unwrap()
    }

    fn movie(dir: &tempfile::TempDir) -> PathBuf {
        let input = dir.path().join("movie.mkv");
        fs::write(&input, b"x").unwrap();
        input
    }

    #[test]
    fn successful_job_ends_at_one_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with_script(
            &dir,
            "printf 'frame=1 time=00:01:00.00 bitrate=1\\r' >&2\n\
             printf 'frame=2 time=00:02:00.00 bitrate=1\\r' >&2\n\
             printf 'mp4' > \"$last\"",
        );

        let note = app.run_single(movie(&dir)).unwrap();

        assert!(matches!(note, Notification::Success(_)), "{note:?}");
        assert!(dir.path().join("movie.mp4").is_file());
        assert_eq!(app.view().progress(), 100.0);
        assert!(app.view().select_enabled());
        assert!(app.view().run_enabled());
        assert!(app.view().log().iter().any(|e| e.message == "Progress: 50.00%"));
    }

    #[test]
    fn failed_job_reports_code_and_restores_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with_script(&dir, "echo 'Conversion failed!' >&2\nexit 1");

        let note = app.run_single(movie(&dir)).unwrap();

        match note {
            Notification::Error(msg) => assert!(msg.contains("exit code: 1"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(app.view().select_enabled());
        assert!(app.view().run_enabled());
        assert!(!app.view().log().iter().any(|e| e.message.contains("completed successfully")));
    }

    #[test]
    fn interrupt_cancels_a_job_that_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with_script(&dir, "sleep 5\nprintf 'mp4' > \"$last\"");
        let interrupted = Arc::clone(&app.interrupted);
        let ctrl_c = thread::spawn(move || {
            thread::sleep(Duration::from_millis(400));
            interrupted.store(true, Ordering::Relaxed);
        });

        let started = Instant::now();
        let note = app.run_single(movie(&dir)).unwrap();
        ctrl_c.join().unwrap();

        assert!(matches!(note, Notification::Cancelled), "{note:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!dir.path().join("movie.mp4").exists());
        assert!(!app.interrupted.load(Ordering::Relaxed));
        assert!(app.idle.load(Ordering::Relaxed));
        assert!(app.view().select_enabled());
        assert!(app.view().run_enabled());
    }

    #[test]
    fn ctrl_c_handling_survives_consecutive_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with_script(&dir, "sleep 5");

        for _ in 0..2 {
            let interrupted = Arc::clone(&app.interrupted);
            let ctrl_c = thread::spawn(move || {
                thread::sleep(Duration::from_millis(400));
                interrupted.store(true, Ordering::Relaxed);
            });
            let note = app.run_single(movie(&dir)).unwrap();
            ctrl_c.join().unwrap();
            assert!(matches!(note, Notification::Cancelled), "{note:?}");
        }
    }
}
