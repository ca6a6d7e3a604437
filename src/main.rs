mod app;
mod cli;
mod error;
mod ffmpeg;
mod job;
mod probe;
mod progress;
mod relay;
mod tui;
mod view;

use anyhow::Result;
use app::App;
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use view::Notification;

fn main() -> Result<ExitCode> {
    let cfg = Cli::parse().into_config()?;
    init_tracing(cfg.verbose);
    log_startup_diagnostics();

    let mut app = App::new(cfg.clone())?;
    let outcome = match cfg.input {
        Some(input) => Some(app.run_single(input)?),
        None => app.run_interactive()?,
    };

    Ok(match outcome {
        Some(Notification::Success(_)) | None => ExitCode::SUCCESS,
        Some(_) => ExitCode::FAILURE,
    })
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "mkv2mp4=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn log_startup_diagnostics() {
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "application startup");
    let exe = std::env::current_exe().ok();
    if let Some(exe) = &exe {
        tracing::debug!(path = %exe.display(), "application path");
    }
    if let Ok(cwd) = std::env::current_dir() {
        tracing::debug!(path = %cwd.display(), "working directory");
    }

    let Some(install_dir) = exe.as_deref().and_then(|e| e.parent()) else {
        return;
    };
    match std::fs::read_dir(install_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let kind = if entry.path().is_dir() { "directory" } else { "file" };
                tracing::debug!(
                    name = %entry.file_name().to_string_lossy(),
                    kind,
                    "installation directory entry"
                );
            }
        }
        Err(err) => tracing::debug!(%err, "error listing installation directory"),
    }
}
