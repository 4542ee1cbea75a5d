//! Per-entry state and per-call results.

use crate::operation::OperationSnapshot;
use capfs_core::{FileStat, Identifier};
use std::fmt;
use tracing::warn;

/// Lifecycle of one transferred entry.
///
/// `Pending → [ConfirmingOverwrite →] Transferring → {Completed, Skipped, Failed}`.
/// A declined overwrite goes straight from `ConfirmingOverwrite` to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    Pending,
    ConfirmingOverwrite,
    Transferring,
    Completed,
    Skipped,
    Failed,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        use EntryState::{Completed, ConfirmingOverwrite, Failed, Pending, Skipped, Transferring};
        matches!(
            (self, next),
            (Pending, ConfirmingOverwrite | Transferring | Skipped | Failed)
                | (ConfirmingOverwrite, Transferring | Skipped | Failed)
                | (Transferring, Completed | Skipped | Failed)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::ConfirmingOverwrite => "confirming overwrite",
            Self::Transferring => "transferring",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Description of one node being transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEntry {
    pub name: String,
    pub is_directory: bool,
    /// Known for files once their metadata has been read.
    pub size: Option<u64>,
}

impl TransferEntry {
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        Self {
            name: name.into(),
            is_directory,
            size: None,
        }
    }

    /// Entry of a bridge node whose metadata is already known.
    pub fn from_stat(name: impl Into<String>, stat: &FileStat) -> Self {
        Self {
            name: name.into(),
            is_directory: stat.is_directory(),
            size: stat.is_file().then_some(stat.size),
        }
    }
}

/// Outcome of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub entry: TransferEntry,
    /// Bridge identifier of the entry: the destination of an upload, the
    /// source of a download.
    pub resource: Identifier,
    pub state: EntryState,
    /// Reason for `Failed` or `Skipped`.
    pub reason: Option<String>,
}

impl EntryReport {
    pub fn new(entry: TransferEntry, resource: Identifier) -> Self {
        Self {
            entry,
            resource,
            state: EntryState::Pending,
            reason: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: EntryState) {
        if self.state.can_advance_to(next) {
            self.state = next;
        } else {
            warn!(
                entry = %self.resource,
                from = %self.state,
                to = %next,
                "Ignoring illegal entry transition"
            );
        }
    }

    /// Terminate as `Failed` (or `Skipped`) with a reason.
    pub fn finish_with(&mut self, state: EntryState, reason: impl Into<String>) {
        self.advance(state);
        self.reason = Some(reason.into());
    }
}

/// Result of one upload or download call.
///
/// Counts are best effort: a finished call does not guarantee that every
/// requested entry made it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    /// Terminal reports of every entry that was processed, in completion
    /// order.
    pub entries: Vec<EntryReport>,
    pub files_total: u64,
    pub files_completed: u64,
    /// Known up front only when every source is a file.
    pub bytes_total: Option<u64>,
    pub bytes_transferred: u64,
    /// Top-level upload sources that could not be read at all. Each also
    /// has a `Failed` report.
    pub inaccessible: usize,
    /// Whether cancellation was observed.
    pub cancelled: bool,
}

impl TransferSummary {
    pub(crate) fn new(entries: Vec<EntryReport>, snapshot: &OperationSnapshot, cancelled: bool) -> Self {
        Self {
            entries,
            files_total: snapshot.files_total,
            files_completed: snapshot.files_completed,
            bytes_total: snapshot.bytes_total,
            bytes_transferred: snapshot.bytes_transferred,
            inaccessible: 0,
            cancelled,
        }
    }

    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    pub fn failed(&self) -> usize {
        self.count(EntryState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(EntryState::Skipped)
    }

    /// Report of the entry at `resource`.
    pub fn entry(&self, resource: &Identifier) -> Option<&EntryReport> {
        self.entries.iter().find(|e| &e.resource == resource)
    }
}
