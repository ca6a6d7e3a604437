use crate::error::ConvertError;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use which::which;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BIN: &str = "ffmpeg";

/// Non-progress stderr lines kept for the failure report.
const STDERR_TAIL_LINES: usize = 20;

/// How long a supervised process may go quiet before the cancel flag is
/// looked at again.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
}

/// Locate FFmpeg: explicit override, then next to our own executable, then
/// `PATH`.
pub fn resolve_tools(ffmpeg: Option<&Path>) -> Result<Tools, ConvertError> {
    if let Some(path) = ffmpeg {
        if path.is_file() {
            return Ok(Tools {
                ffmpeg: path.to_path_buf(),
            });
        }
        return Err(ConvertError::ToolNotFound(format!(
            "provided binary not found: {}",
            path.display()
        )));
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        for candidate in [dir.join(FFMPEG_BIN), dir.join("ffmpeg").join(FFMPEG_BIN)] {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "using bundled ffmpeg");
                return Ok(Tools { ffmpeg: candidate });
            }
        }
        tracing::debug!(dir = %dir.display(), "no ffmpeg beside executable, searching PATH");
    }

    which("ffmpeg")
        .map(|ffmpeg| Tools { ffmpeg })
        .map_err(|_| {
            ConvertError::ToolNotFound(
                "`ffmpeg` is neither bundled with this program nor in PATH".into(),
            )
        })
}

/// Keep child processes from opening a console window on Windows. On Unix
/// the child gets its own process group so a terminal Ctrl-C reaches only
/// us; stopping FFmpeg is then the job's decision.
pub fn configure_command(cmd: &mut Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(any(windows, unix)))]
    let _ = cmd;
}

/// Rewrite `/` to the host separator. A no-op on Unix.
pub fn normalize_separators(path: &Path) -> PathBuf {
    if std::path::MAIN_SEPARATOR == '/' {
        return path.to_path_buf();
    }
    PathBuf::from(
        path.to_string_lossy()
            .replace('/', std::path::MAIN_SEPARATOR_STR),
    )
}

/// Fixed H.264/AAC argument vector for one conversion.
pub fn encode_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), normalize_separators(input).into()];
    args.extend(
        [
            "-c:v", "libx264", "-preset", "slow", "-crf", "23", "-c:a", "aac", "-b:a", "128k",
            "-movflags", "+faststart", "-y",
        ]
        .map(OsString::from),
    );
    args.push(normalize_separators(output).into());
    args
}

/// Splits a byte stream on `\r` as well as `\n`, since FFmpeg redraws its
/// stats line with carriage returns. Empty lines are skipped.
pub struct DiagnosticLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> DiagnosticLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    fn next_raw(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    self.buf.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    if self.buf.is_empty() {
                        continue;
                    }
                    return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
                }
                None => {
                    let len = available.len();
                    self.buf.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
        if self.buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
        }
    }
}

impl<R: BufRead> Iterator for DiagnosticLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_raw().transpose()
    }
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub stdout: String,
}

/// Owns the single-conversion slot. At most one [`ActiveJob`] exists at a
/// time per supervisor.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    active: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the slot. Fails with [`ConvertError::Busy`] while another job
    /// holds it.
    pub fn acquire(&self) -> Result<ActiveJob, ConvertError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConvertError::Busy)?;
        Ok(ActiveJob {
            active: Arc::clone(&self.active),
        })
    }
}

/// The claimed slot. Released when dropped.
#[derive(Debug)]
pub struct ActiveJob {
    active: Arc<AtomicBool>,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

impl ActiveJob {
    /// Run FFmpeg with `args`, feeding every stderr line to `on_line`, and
    /// block until the stream is exhausted and the process reaped.
    ///
    /// `cancel` is checked after every line and at least every
    /// [`CANCEL_POLL`] while FFmpeg is silent. Once set, the process is
    /// killed, `on_line` is not called again and the result is
    /// [`ConvertError::Cancelled`].
    ///
    /// Lines for which `is_noise` returns true are left out of the stderr
    /// tail attached to [`ConvertError::ProcessFailure`].
    pub fn run<F, N>(
        &self,
        tools: &Tools,
        args: &[OsString],
        cancel: &AtomicBool,
        is_noise: N,
        mut on_line: F,
    ) -> Result<ProcessOutcome, ConvertError>
    where
        F: FnMut(&str),
        N: Fn(&str) -> bool,
    {
        let mut cmd = Command::new(&tools.ffmpeg);
        configure_command(&mut cmd);
        let mut child = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(&tools.ffmpeg, source))?;

        let stdout_reader = child.stdout.take().map(collect_in_background);
        let Some(stderr) = child.stderr.take() else {
            reap(&mut child);
            return Err(ConvertError::Io(std::io::Error::other(
                "failed to capture ffmpeg stderr",
            )));
        };
        let lines = lines_in_background(stderr);

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        loop {
            let next = lines.recv_timeout(CANCEL_POLL);
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!(pid = child.id(), "cancelling ffmpeg");
                reap(&mut child);
                return Err(ConvertError::Cancelled);
            }
            let line = match next {
                Ok(Ok(line)) => line,
                Ok(Err(err)) => {
                    reap(&mut child);
                    return Err(err.into());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !is_noise(&line) {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
            }
            on_line(&line);
        }

        let status = child.wait()?;
        let stdout = joined(stdout_reader);

        if status.success() {
            Ok(ProcessOutcome { stdout })
        } else {
            Err(ConvertError::ProcessFailure {
                code: status.code(),
                stderr_tail: Vec::from(tail).join("\n"),
            })
        }
    }
}

/// Run a short-lived FFmpeg invocation and return stdout followed by stderr.
/// The exit status is ignored: `ffmpeg -i <file>` exits non-zero by design.
/// Setting `cancel` kills the process and yields [`ConvertError::Cancelled`].
pub fn capture_combined(
    tools: &Tools,
    args: &[OsString],
    cancel: &AtomicBool,
) -> Result<String, ConvertError> {
    let mut cmd = Command::new(&tools.ffmpeg);
    configure_command(&mut cmd);
    let mut child = cmd
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| spawn_error(&tools.ffmpeg, source))?;

    let stdout = child.stdout.take().map(collect_in_background);
    let stderr = child.stderr.take().map(collect_in_background);
    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!(pid = child.id(), "cancelling ffmpeg");
            reap(&mut child);
            return Err(ConvertError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => thread::sleep(CANCEL_POLL),
            Err(err) => {
                reap(&mut child);
                return Err(err.into());
            }
        }
    }

    let mut text = joined(stdout);
    text.push_str(&joined(stderr));
    Ok(text)
}

fn spawn_error(program: &Path, source: std::io::Error) -> ConvertError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ConvertError::ToolNotFound(program.display().to_string())
    } else {
        ConvertError::Spawn {
            program: program.to_path_buf(),
            source,
        }
    }
}

fn collect_in_background<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Stderr framed by [`DiagnosticLines`] on a helper thread, so the caller
/// can wait with a timeout instead of blocking on the pipe. The channel
/// closes at end of stream or after the first read error.
fn lines_in_background<R: Read + Send + 'static>(
    reader: R,
) -> Receiver<std::io::Result<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in DiagnosticLines::new(BufReader::new(reader)) {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn joined(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(pid = child.id(), %err, "kill failed");
    }
    let _ = child.wait();
}
