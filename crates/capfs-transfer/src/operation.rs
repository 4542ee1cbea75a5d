//! Per-call transfer counters.
//!
//! A [`TransferOperation`] belongs to exactly one upload or download call.
//! Counters only ever grow. `files_total` grows while directories are
//! enumerated, and `files_completed` never exceeds it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TransferOperation {
    files_total: AtomicU64,
    files_completed: AtomicU64,
    bytes_total: Option<u64>,
    bytes_transferred: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of an operation's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationSnapshot {
    pub files_total: u64,
    pub files_completed: u64,
    pub bytes_total: Option<u64>,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

impl OperationSnapshot {
    /// Average throughput since the operation started.
    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs < 1.0 {
            return self.bytes_transferred;
        }
        // Truncation is fine for a display rate
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rate = (self.bytes_transferred as f64 / secs) as u64;
        rate
    }
}

impl TransferOperation {
    /// Start an operation that already knows about `initial_total` entries.
    pub fn new(initial_total: u64) -> Self {
        Self {
            files_total: AtomicU64::new(initial_total),
            files_completed: AtomicU64::new(0),
            bytes_total: None,
            bytes_transferred: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Same, with a known byte total.
    pub fn with_bytes_total(initial_total: u64, bytes_total: Option<u64>) -> Self {
        Self {
            bytes_total,
            ..Self::new(initial_total)
        }
    }

    /// Entries discovered while walking.
    pub fn add_total(&self, discovered: u64) {
        self.files_total.fetch_add(discovered, Ordering::SeqCst);
    }

    /// One more entry finished successfully.
    pub fn complete_file(&self) {
        // Saturates at files_total
        let _ = self
            .files_completed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |done| {
                (done < self.files_total.load(Ordering::SeqCst)).then_some(done + 1)
            });
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn files_total(&self) -> u64 {
        self.files_total.load(Ordering::SeqCst)
    }

    pub fn files_completed(&self) -> u64 {
        self.files_completed.load(Ordering::SeqCst)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        // Read completed before total
        let files_completed = self.files_completed();
        OperationSnapshot {
            files_total: self.files_total(),
            files_completed,
            bytes_total: self.bytes_total,
            bytes_transferred: self.bytes_transferred(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_grows_with_discovery() {
        let op = TransferOperation::new(2);
        op.complete_file();
        op.add_total(3);
        op.complete_file();
        let snap = op.snapshot();
        assert_eq!(snap.files_total, 5);
        assert_eq!(snap.files_completed, 2);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let op = TransferOperation::new(1);
        op.complete_file();
        op.complete_file();
        assert_eq!(op.files_completed(), 1);
    }

    #[test]
    fn test_bytes_total_is_carried_into_snapshots() {
        let op = TransferOperation::with_bytes_total(2, Some(3072));
        op.add_bytes(1024);
        let snap = op.snapshot();
        assert_eq!(snap.bytes_total, Some(3072));
        assert_eq!(snap.bytes_transferred, 1024);

        assert_eq!(TransferOperation::new(2).snapshot().bytes_total, None);
    }

    #[test]
    fn test_rate_under_one_second_is_raw_bytes() {
        let snap = OperationSnapshot {
            files_total: 1,
            files_completed: 0,
            bytes_total: None,
            bytes_transferred: 4096,
            elapsed: Duration::from_millis(10),
        };
        assert_eq!(snap.bytes_per_second(), 4096);

        let snap = OperationSnapshot {
            elapsed: Duration::from_secs(4),
            ..snap
        };
        assert_eq!(snap.bytes_per_second(), 1024);
    }
}
