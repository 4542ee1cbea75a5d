//! Upload walker: import external trees into the bridge.
//!
//! Top-level sources that cannot be read are reported as failed up front.
//! Name collisions among the rest are confirmed before anything is admitted,
//! one question per entry or a single question for all of them depending on
//! [`OverwritePrompt`]. Admitted entries then run through a shared [`Limiter`]:
//!
//! - files below the streaming threshold are read whole and written with a
//!   single buffered write; larger files are piped chunk by chunk into one
//!   writable
//! - directories are created, enumerated batch by batch (growing
//!   `files_total` as children are discovered), then their files are queued
//!   on the limiter while their subdirectories run one after another
//!
//! A directory gives its admission slot back before fanning out, so nested
//! trees cannot starve the limiter.

use crate::collaborators::{Confirm, ConfirmRequest, Opener};
use crate::config::{OverwritePrompt, TransferConfig};
use crate::entry::{EntryReport, EntryState, TransferSummary};
use crate::error::{Result, TransferError};
use crate::limiter::{Limiter, LimiterPermit};
use crate::operation::TransferOperation;
use crate::progress::{
    ProgressAggregator, ProgressReporter, large_file_message, small_file_message, summary_message,
};
use crate::source::{SourceDirectory, SourceFile, TransferSource};
use capfs_core::{DeleteOptions, HandleFileSystem, Identifier, ProviderError, WriteOptions};
use futures::future::{BoxFuture, join_all};
use futures::{FutureExt, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Uploads external content into a bridge directory.
pub struct Uploader {
    fs: Arc<HandleFileSystem>,
    confirm: Arc<dyn Confirm>,
    opener: Option<Arc<dyn Opener>>,
    reporter: Arc<dyn ProgressReporter>,
    config: TransferConfig,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .field("opener", &self.opener.is_some())
            .finish_non_exhaustive()
    }
}

impl Uploader {
    pub fn new(
        fs: Arc<HandleFileSystem>,
        confirm: Arc<dyn Confirm>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            fs,
            confirm,
            opener: None,
            reporter,
            config: TransferConfig::default(),
        }
    }

    /// Open the uploaded file when a single file was uploaded.
    #[must_use]
    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Self {
        self.opener = Some(opener);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload `sources` into the directory `target`.
    ///
    /// Per-entry failures are reported in the summary and never abort the
    /// batch. Errors are returned only when `target` is not a usable
    /// directory.
    pub async fn upload(
        &self,
        target: &Identifier,
        sources: Vec<TransferSource>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let op = Arc::new(TransferOperation::new(0));
        self.upload_tracked(target, sources, op, cancel).await
    }

    /// Same as [`Uploader::upload`], counting into `op` so the caller can
    /// watch the counters while the call runs.
    ///
    /// `op` must be fresh: the top-level files are added to its total when
    /// the call starts.
    #[instrument(level = "info", skip(self, sources, op, cancel), fields(target = %target, sources = sources.len()))]
    pub async fn upload_tracked(
        &self,
        target: &Identifier,
        sources: Vec<TransferSource>,
        op: Arc<TransferOperation>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        if !self.fs.stat(target).await?.is_directory() {
            return Err(ProviderError::unavailable(target, "Upload target is not a folder").into());
        }

        let lone_file = match sources.as_slice() {
            [TransferSource::File(file)] => Some(target.join(file.name())),
            _ => None,
        };

        let mut readable = Vec::with_capacity(sources.len());
        let mut unreadable = Vec::new();
        for source in sources {
            if source.is_accessible().await {
                readable.push(source);
            } else {
                let mut report = EntryReport::new(source.describe(), target.join(source.name()));
                report.finish_with(EntryState::Failed, "The source could not be accessed");
                unreadable.push(report);
            }
        }
        let inaccessible = unreadable.len();
        if inaccessible > 0 {
            warn!(count = inaccessible, "Skipping sources that could not be accessed");
        }

        let initial_files = readable.iter().filter(|s| !s.is_directory()).count() as u64;
        op.add_total(initial_files);

        let run = UploadRun {
            uploader: self,
            op,
            limiter: Limiter::new(self.config.max_parallel),
            progress: ProgressAggregator::new(self.reporter.clone(), self.config.progress_interval),
            cancel,
            reports: Mutex::new(unreadable),
        };

        let admitted = run.confirm_collisions(target, readable).await;
        join_all(
            admitted
                .into_iter()
                .map(|(source, report)| run.upload_entry(source, report)),
        )
        .await;

        let cancelled = cancel.is_cancelled();
        let snapshot = run.op.snapshot();
        run.progress
            .finish(summary_message("Uploaded", &snapshot, cancelled));
        let mut summary = TransferSummary::new(run.reports.into_inner(), &snapshot, cancelled);
        summary.inaccessible = inaccessible;
        info!(
            completed = summary.files_completed,
            total = summary.files_total,
            failed = summary.failed(),
            skipped = summary.skipped(),
            cancelled,
            "Upload finished"
        );

        if let (Some(resource), Some(opener)) = (lone_file, &self.opener) {
            let completed = summary
                .entry(&resource)
                .is_some_and(|e| e.state == EntryState::Completed);
            if completed && !cancelled {
                if let Err(e) = opener.open(&resource).await {
                    warn!(resource = %resource, error = %e, "Failed to open uploaded file");
                }
            }
        }

        Ok(summary)
    }
}

/// State of one `upload` call.
struct UploadRun<'a> {
    uploader: &'a Uploader,
    op: Arc<TransferOperation>,
    limiter: Limiter,
    progress: ProgressAggregator,
    cancel: &'a CancellationToken,
    reports: Mutex<Vec<EntryReport>>,
}

impl<'a> UploadRun<'a> {
    fn fs(&self) -> &HandleFileSystem {
        &self.uploader.fs
    }

    fn record(&self, report: EntryReport) {
        trace!(entry = %report.resource, state = %report.state, "Entry settled");
        self.reports.lock().push(report);
    }

    fn settle(&self, mut report: EntryReport, result: Result<()>) {
        match result {
            Ok(()) => report.advance(EntryState::Completed),
            Err(e) if e.is_cancelled() => report.finish_with(EntryState::Skipped, "Cancelled"),
            Err(e) => {
                warn!(entry = %report.resource, error = %e, "Upload of entry failed");
                report.finish_with(EntryState::Failed, e.to_string());
            }
        }
        self.record(report);
    }

    /// Ask before replacing existing top-level entries. Returns what may
    /// proceed, in source order.
    async fn confirm_collisions(
        &self,
        target: &Identifier,
        sources: Vec<TransferSource>,
    ) -> Vec<(TransferSource, EntryReport)> {
        let mut checked = Vec::with_capacity(sources.len());
        for source in sources {
            if self.cancel.is_cancelled() {
                return Vec::new();
            }
            let resource = target.join(source.name());
            let mut report = EntryReport::new(source.describe(), resource.clone());
            match self.fs().exists(&resource).await {
                Ok(exists) => checked.push((source, report, exists)),
                Err(e) => {
                    report.finish_with(EntryState::Failed, e.to_string());
                    self.record(report);
                }
            }
        }

        let batch_answer = match self.uploader.config.overwrite_prompt {
            OverwritePrompt::Batch => {
                let names: Vec<&str> = checked
                    .iter()
                    .filter(|(_, _, exists)| *exists)
                    .map(|(source, _, _)| source.name())
                    .collect();
                if names.is_empty() || self.cancel.is_cancelled() {
                    None
                } else {
                    let answer = self
                        .uploader
                        .confirm
                        .confirm(ConfirmRequest::multiple_overwrite(&names))
                        .await;
                    debug!(
                        collisions = names.len(),
                        confirmed = answer.confirmed,
                        "Batched overwrite answered"
                    );
                    Some(answer.confirmed)
                }
            }
            OverwritePrompt::Each => None,
        };

        let mut admitted = Vec::with_capacity(checked.len());
        for (source, mut report, exists) in checked {
            if self.cancel.is_cancelled() {
                break;
            }
            if !exists {
                admitted.push((source, report));
                continue;
            }
            let resource = report.resource.clone();

            report.advance(EntryState::ConfirmingOverwrite);
            let confirmed = match batch_answer {
                Some(confirmed) => confirmed,
                None => {
                    self.uploader
                        .confirm
                        .confirm(ConfirmRequest::file_overwrite(source.name()))
                        .await
                        .confirmed
                }
            };
            if !confirmed {
                debug!(entry = %resource, "Overwrite declined");
                report.finish_with(EntryState::Skipped, "Kept the existing entry");
                self.record(report);
                continue;
            }

            if let Err(e) = self
                .fs()
                .delete(&resource, DeleteOptions { recursive: true })
                .await
            {
                report.finish_with(EntryState::Failed, e.to_string());
                self.record(report);
                continue;
            }
            admitted.push((source, report));
        }
        admitted
    }

    fn upload_entry(&'a self, source: TransferSource, mut report: EntryReport) -> BoxFuture<'a, ()> {
        async move {
            let Some(permit) = self.limiter.acquire(self.cancel).await else {
                trace!(entry = %report.resource, "Not admitted after cancellation");
                return;
            };
            report.advance(EntryState::Transferring);

            match source {
                TransferSource::File(file) => {
                    let result = self.upload_file(&file, &mut report).await;
                    drop(permit);
                    self.settle(report, result);
                }
                TransferSource::Directory(dir) => {
                    self.upload_directory(&dir, report, permit).await;
                }
            }
        }
        .boxed()
    }

    async fn upload_file(&self, file: &Arc<dyn SourceFile>, report: &mut EntryReport) -> Result<()> {
        let dest = &report.resource;
        let size = file.size().await?;
        report.entry.size = Some(size);
        let streamed = self.uploader.config.is_streamed(size) && file.supports_streaming();

        if streamed {
            let op = self.op.clone();
            let progress = self.progress.clone();
            let name = file.name().to_string();
            let mut transferred = 0u64;
            let chunks = file
                .open_stream()
                .await?
                .inspect_ok(move |chunk| {
                    let len = chunk.len() as u64;
                    transferred += len;
                    op.add_bytes(len);
                    progress.work(large_file_message(&name, transferred, size, &op.snapshot()));
                })
                .boxed();
            let written = self
                .fs()
                .write_file_stream(dest, chunks, WriteOptions::create_or_overwrite(), self.cancel)
                .await?;
            trace!(entry = %dest, bytes = written, "Streamed upload");
        } else {
            let content = file.read_all().await?;
            let len = content.len() as u64;
            self.fs()
                .write_file(dest, content, WriteOptions::create_or_overwrite())
                .await?;
            self.op.add_bytes(len);
        }

        self.op.complete_file();
        if !streamed {
            self.progress
                .work(small_file_message(file.name(), &self.op.snapshot()));
        }
        Ok(())
    }

    async fn upload_directory(
        &'a self,
        dir: &Arc<dyn SourceDirectory>,
        report: EntryReport,
        permit: LimiterPermit,
    ) {
        self.op.add_total(1);
        let dest = report.resource.clone();

        let children = match self.enumerate(dir, &dest).await {
            Ok(children) => children,
            Err(e) => {
                drop(permit);
                self.settle(report, Err(e));
                return;
            }
        };
        drop(permit);

        let (dirs, files): (Vec<_>, Vec<_>) =
            children.into_iter().partition(TransferSource::is_directory);
        debug!(entry = %dest, files = files.len(), dirs = dirs.len(), "Uploading folder contents");

        join_all(files.into_iter().map(|child| {
            let report = EntryReport::new(child.describe(), dest.join(child.name()));
            self.upload_entry(child, report)
        }))
        .await;

        for child in dirs {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = EntryReport::new(child.describe(), dest.join(child.name()));
            self.upload_entry(child, report).await;
        }

        if self.cancel.is_cancelled() {
            self.settle(report, Err(TransferError::Cancelled));
        } else {
            self.op.complete_file();
            self.settle(report, Ok(()));
        }
    }

    /// Create the destination folder and read every child batch.
    async fn enumerate(
        &self,
        dir: &Arc<dyn SourceDirectory>,
        dest: &Identifier,
    ) -> Result<Vec<TransferSource>> {
        self.fs().mkdir(dest).await?;
        let mut reader = dir.open_reader().await?;
        let mut children = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let batch = reader.read_batch().await?;
            if batch.is_empty() {
                break;
            }
            let files = batch.iter().filter(|c| !c.is_directory()).count();
            self.op.add_total(files as u64);
            children.extend(batch);
        }
        Ok(children)
    }
}
