//! Time-coalesced progress reporting.
//!
//! Transfers generate a progress message per file (and per chunk for large
//! files). The [`ProgressAggregator`] keeps only the latest one and hands it
//! to the [`ProgressReporter`] at most once per interval, on the trailing
//! edge. [`ProgressAggregator::finish`] always reports, so the final summary
//! is never swallowed by the window.

use crate::operation::OperationSnapshot;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// One progress message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStep {
    pub message: String,
}

impl ProgressStep {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Sink for coalesced progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, step: ProgressStep);
}

/// Reporter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&self, _step: ProgressStep) {}
}

#[derive(Default)]
struct Pending {
    step: Option<ProgressStep>,
    flush: Option<JoinHandle<()>>,
    finished: bool,
}

/// Trailing-edge coalescer in front of a [`ProgressReporter`].
///
/// Cheap to clone; clones share the window.
#[derive(Clone)]
pub struct ProgressAggregator {
    pending: Arc<Mutex<Pending>>,
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ProgressAggregator {
    pub fn new(reporter: Arc<dyn ProgressReporter>, interval: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Pending::default())),
            reporter,
            interval,
        }
    }

    /// Record the latest step. It is reported when the current window
    /// closes unless a newer step replaces it first.
    pub fn work(&self, step: ProgressStep) {
        let mut pending = self.pending.lock();
        if pending.finished {
            return;
        }
        pending.step = Some(step);
        if pending.flush.is_some() {
            return;
        }

        let shared = self.pending.clone();
        let reporter = self.reporter.clone();
        let interval = self.interval;
        pending.flush = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // Held while reporting, as in finish()
            let mut pending = shared.lock();
            pending.flush = None;
            if pending.finished {
                return;
            }
            if let Some(step) = pending.step.take() {
                trace!(message = %step, "Flushing progress");
                reporter.report(step);
            }
        }));
    }

    /// Cancel any pending flush and report the final step. Nothing is
    /// reported after it.
    pub fn finish(&self, summary: ProgressStep) {
        let mut pending = self.pending.lock();
        pending.finished = true;
        pending.step = None;
        if let Some(flush) = pending.flush.take() {
            flush.abort();
        }
        self.reporter.report(summary);
    }
}

/// Human-readable byte count (1024-based).
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Message after a file smaller than the streaming threshold.
///
/// A lone file is reported by name only; otherwise the file counts and the
/// overall rate are included.
pub fn small_file_message(name: &str, snapshot: &OperationSnapshot) -> ProgressStep {
    if snapshot.files_total == 1 {
        return ProgressStep::new(name);
    }
    ProgressStep::new(format!(
        "{name} ({}/{} files, {}/s)",
        snapshot.files_completed,
        snapshot.files_total,
        format_bytes(snapshot.bytes_per_second())
    ))
}

/// Message while a large file is being streamed.
pub fn large_file_message(
    name: &str,
    transferred: u64,
    total: u64,
    snapshot: &OperationSnapshot,
) -> ProgressStep {
    ProgressStep::new(format!(
        "{name} ({}/{}, {}/s)",
        format_bytes(transferred),
        format_bytes(total),
        format_bytes(snapshot.bytes_per_second())
    ))
}

/// Final message of a transfer call.
pub fn summary_message(verb: &str, snapshot: &OperationSnapshot, cancelled: bool) -> ProgressStep {
    let mut message = format!(
        "{verb} {} of {} files ({})",
        snapshot.files_completed,
        snapshot.files_total,
        format_bytes(snapshot.bytes_transferred)
    );
    if cancelled {
        message.push_str(", cancelled");
    }
    ProgressStep::new(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressReporter for Recorder {
        fn report(&self, step: ProgressStep) {
            self.0.lock().push(step.message);
        }
    }

    impl Recorder {
        fn messages(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    fn snapshot(completed: u64, total: u64, bytes: u64) -> OperationSnapshot {
        OperationSnapshot {
            files_total: total,
            files_completed: completed,
            bytes_total: None,
            bytes_transferred: bytes,
            elapsed: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_report() {
        let recorder = Arc::new(Recorder::default());
        let progress = ProgressAggregator::new(recorder.clone(), Duration::from_secs(1));

        for i in 0..100 {
            progress.work(ProgressStep::new(format!("file {i}")));
        }
        assert!(recorder.messages().is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(recorder.messages(), vec!["file 99"]);

        progress.finish(ProgressStep::new("done 100"));
        assert_eq!(recorder.messages(), vec!["file 99", "done 100"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_drops_pending_and_always_reports() {
        let recorder = Arc::new(Recorder::default());
        let progress = ProgressAggregator::new(recorder.clone(), Duration::from_secs(1));

        progress.work(ProgressStep::new("file 1"));
        progress.finish(ProgressStep::new("summary"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        progress.work(ProgressStep::new("late"));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(recorder.messages(), vec!["summary"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_summary_is_last_when_flush_races_finish() {
        for _ in 0..100 {
            let recorder = Arc::new(Recorder::default());
            let progress = ProgressAggregator::new(recorder.clone(), Duration::ZERO);

            progress.work(ProgressStep::new("step"));
            tokio::task::yield_now().await;
            progress.finish(ProgressStep::new("summary"));
            tokio::time::sleep(Duration::from_millis(2)).await;

            let messages = recorder.messages();
            assert_eq!(messages.last().map(String::as_str), Some("summary"));
            assert!(messages.len() <= 2, "{messages:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_spaced() {
        let recorder = Arc::new(Recorder::default());
        let progress = ProgressAggregator::new(recorder.clone(), Duration::from_secs(1));

        progress.work(ProgressStep::new("a"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        progress.work(ProgressStep::new("b"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(recorder.messages(), vec!["a"]);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.messages(), vec!["a", "b"]);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_small_file_messages() {
        assert_eq!(small_file_message("a.txt", &snapshot(1, 1, 10)).message, "a.txt");
        assert_eq!(
            small_file_message("a.txt", &snapshot(2, 5, 4096)).message,
            "a.txt (2/5 files, 2.00 KB/s)"
        );
    }

    #[test]
    fn test_large_file_message() {
        let step = large_file_message("big.iso", 512 * 1024, 2 * 1024 * 1024, &snapshot(0, 1, 1024 * 1024));
        assert_eq!(step.message, "big.iso (512.00 KB/2.00 MB, 512.00 KB/s)");
    }

    #[test]
    fn test_summary_message() {
        let step = summary_message("Uploaded", &snapshot(3, 4, 2048), true);
        assert_eq!(step.message, "Uploaded 3 of 4 files (2.00 KB), cancelled");
    }
}
