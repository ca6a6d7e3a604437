//! Queue pair that hands log text and progress values from the job thread to
//! the foreground loop.
//!
//! Producers never block. The consumer takes everything currently queued in
//! one call and never waits for more.

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;

/// One line of the job log, stamped when it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Unbounded FIFO with non-blocking pushes and drain-all reads.
#[derive(Debug)]
pub struct RelayChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> RelayChannel<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Take every item queued right now, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T> Default for RelayChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side, owned by the foreground loop.
#[derive(Debug, Default)]
pub struct Relay {
    logs: RelayChannel<LogEntry>,
    progress: RelayChannel<f64>,
}

/// Producer side, moved into the job thread.
#[derive(Debug, Clone)]
pub struct RelaySender {
    logs: Sender<LogEntry>,
    progress: Sender<f64>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> RelaySender {
        RelaySender {
            logs: self.logs.sender(),
            progress: self.progress.sender(),
        }
    }

    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.logs.drain()
    }

    pub fn drain_progress(&self) -> Vec<f64> {
        self.progress.drain()
    }
}

impl RelaySender {
    pub fn log(&self, message: impl Into<String>) {
        let entry = LogEntry::now(message);
        tracing::debug!(target: "mkv2mp4::job", "{}", entry.message);
        // The receiver lives as long as the foreground loop; a closed queue
        // only happens during shutdown and the item is dropped.
        let _ = self.logs.send(entry);
    }

    pub fn progress(&self, percentage: f64) {
        let _ = self.progress.send(percentage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drain_takes_everything_in_order() {
        let relay = Relay::new();
        let tx = relay.sender();
        for i in 0..5 {
            tx.log(format!("line {i}"));
            tx.progress(i as f64 * 10.0);
        }

        let logs: Vec<_> = relay.drain_logs().into_iter().map(|e| e.message).collect();
        assert_eq!(logs, ["line 0", "line 1", "line 2", "line 3", "line 4"]);
        assert_eq!(relay.drain_progress(), vec![0.0, 10.0, 20.0, 30.0, 40.0]);

        assert!(relay.drain_logs().is_empty());
        assert!(relay.drain_progress().is_empty());
    }

    #[test]
    fn queues_are_independent() {
        let relay = Relay::new();
        let tx = relay.sender();
        tx.progress(12.5);

        assert!(relay.drain_logs().is_empty());
        assert_eq!(relay.drain_progress(), vec![12.5]);
    }

    #[test]
    fn producer_on_another_thread_keeps_fifo_order() {
        let relay = Relay::new();
        let tx = relay.sender();
        let worker = thread::spawn(move || {
            for i in 0..1000 {
                tx.progress(i as f64 / 10.0);
            }
        });
        worker.join().unwrap();

        let got = relay.drain_progress();
        assert_eq!(got.len(), 1000);
        assert!(got.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn push_after_consumer_dropped_does_not_panic() {
        let relay = Relay::new();
        let tx = relay.sender();
        drop(relay);
        tx.log("late");
        tx.progress(100.0);
    }

    #[test]
    fn log_entry_display_has_clock_prefix() {
        let entry = LogEntry::now("hello");
        let shown = entry.to_string();
        assert!(shown.starts_with('['));
        assert_eq!(&shown[9..], "] hello");
    }
}
