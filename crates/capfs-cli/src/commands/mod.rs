pub mod cat;
pub mod get;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod put;
pub mod rm;
pub mod roots;
pub mod stat;

use std::sync::Arc;

use capfs_transfer::{
    EntryState, NullReporter, ProgressReporter, TransferConfig, TransferError, TransferSummary,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::output::StderrReporter;
use crate::session::Session;

/// Everything a command needs.
#[derive(Debug)]
pub struct Context {
    pub session: Session,
    pub transfer: TransferConfig,
    pub quiet: bool,
}

impl Context {
    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        if self.quiet {
            Arc::new(NullReporter)
        } else {
            Arc::new(StderrReporter)
        }
    }
}

/// A transfer finished with failed entries.
#[derive(Debug, Error)]
#[error("{failed} of {total} entries failed")]
pub struct IncompleteTransfer {
    pub failed: usize,
    pub total: usize,
}

/// Cancels its token on Ctrl-C until dropped.
pub struct InterruptGuard {
    token: CancellationToken,
    watcher: JoinHandle<()>,
}

impl InterruptGuard {
    pub fn install() -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received, cancelling transfer");
                cancel.cancel();
            }
        });
        Self { token, watcher }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Print failed and skipped entries, then turn the outcome into an error
/// when the transfer did not fully succeed.
pub fn check_summary(summary: &TransferSummary, quiet: bool) -> anyhow::Result<()> {
    for entry in &summary.entries {
        let label = match entry.state {
            EntryState::Failed => "failed",
            EntryState::Skipped if !quiet => "skipped",
            _ => continue,
        };
        let reason = entry.reason.as_deref().unwrap_or("no reason given");
        eprintln!("{label}: {}: {reason}", entry.resource);
    }
    match summary.inaccessible {
        0 => {}
        1 if summary.entries.len() == 1 => {
            eprintln!("The source could not be accessed for upload.");
        }
        _ => eprintln!("Some or all of the sources could not be accessed for upload."),
    }

    if summary.cancelled {
        return Err(TransferError::Cancelled.into());
    }
    let failed = summary.failed();
    if failed > 0 {
        return Err(IncompleteTransfer {
            failed,
            total: summary.entries.len(),
        }
        .into());
    }
    Ok(())
}
