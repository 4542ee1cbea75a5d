//! Download walker: export bridge content.
//!
//! How content leaves the bridge depends on what the environment offers:
//!
//! - [`DownloadEnvironment::Handles`]: the user picks a destination folder
//!   and the tree is mirrored into it through handles, with the same
//!   streamed/buffered choice as uploads
//! - [`DownloadEnvironment::Blob`]: no destination folder can be obtained, so
//!   each file is read whole (up to a ceiling) and handed to a "save as"
//!   action
//! - [`DownloadEnvironment::Native`]: the user is asked for a destination
//!   path and a native copier does the rest

use crate::collaborators::{BlobSaver, BulkCopier, DirectoryPicker, SaveDialog};
use crate::config::TransferConfig;
use crate::entry::{EntryReport, EntryState, TransferEntry, TransferSummary};
use crate::error::{Result, TransferError};
use crate::limiter::Limiter;
use crate::operation::TransferOperation;
use crate::progress::{
    ProgressAggregator, ProgressReporter, large_file_message, small_file_message, summary_message,
};
use capfs_core::{
    DirectoryHandle, FileStat, HandleFileSystem, HandleKind, Identifier, ProviderError,
    ReadOptions, WritableFileStream,
};
use futures::future::{BoxFuture, join_all};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// What the environment offers for getting content out.
#[derive(Clone)]
pub enum DownloadEnvironment {
    Handles(Arc<dyn DirectoryPicker>),
    Blob(Arc<dyn BlobSaver>),
    Native {
        dialog: Arc<dyn SaveDialog>,
        copier: Arc<dyn BulkCopier>,
    },
}

impl std::fmt::Debug for DownloadEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Handles(_) => "Handles",
            Self::Blob(_) => "Blob",
            Self::Native { .. } => "Native",
        };
        f.write_str(name)
    }
}

/// Downloads bridge content to an external destination.
pub struct Downloader {
    fs: Arc<HandleFileSystem>,
    env: DownloadEnvironment,
    reporter: Arc<dyn ProgressReporter>,
    config: TransferConfig,
    last_download_dir: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("env", &self.env)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    pub fn new(
        fs: Arc<HandleFileSystem>,
        env: DownloadEnvironment,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            fs,
            env,
            reporter,
            config: TransferConfig::default(),
            last_download_dir: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Folder of the last native download, offered as the next default.
    pub fn last_download_dir(&self) -> Option<PathBuf> {
        self.last_download_dir.lock().clone()
    }

    /// Download `sources`.
    ///
    /// Dismissing the destination picker returns [`TransferError::Cancelled`]
    /// and a failing picker aborts with its error. Everything else is
    /// reported per entry in the summary.
    #[instrument(level = "info", skip(self, sources, cancel), fields(env = ?self.env, sources = sources.len()))]
    pub async fn download(
        &self,
        sources: &[Identifier],
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        match &self.env {
            DownloadEnvironment::Handles(picker) => {
                let Some(root) = picker.pick_directory().await? else {
                    debug!("Destination picker dismissed");
                    return Err(TransferError::Cancelled);
                };
                self.download_to_folder(sources, root, cancel).await
            }
            DownloadEnvironment::Blob(saver) => self.download_blobs(sources, saver, cancel).await,
            DownloadEnvironment::Native { dialog, copier } => {
                self.download_native(sources, dialog, copier, cancel).await
            }
        }
    }

    fn run<'a>(
        &'a self,
        initial_files: u64,
        bytes_total: Option<u64>,
        cancel: &'a CancellationToken,
    ) -> DownloadRun<'a> {
        DownloadRun {
            downloader: self,
            op: Arc::new(TransferOperation::with_bytes_total(initial_files, bytes_total)),
            limiter: Limiter::new(self.config.max_parallel),
            progress: ProgressAggregator::new(self.reporter.clone(), self.config.progress_interval),
            cancel,
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Stat every source. Failures become `Failed` reports.
    async fn describe_sources(
        &self,
        sources: &[Identifier],
    ) -> (Vec<(Identifier, FileStat)>, Vec<EntryReport>) {
        let mut described = Vec::with_capacity(sources.len());
        let mut failed = Vec::new();
        for id in sources {
            match self.fs.stat(id).await {
                Ok(stat) => described.push((id.clone(), stat)),
                Err(e) => {
                    let mut report =
                        EntryReport::new(TransferEntry::new(entry_name(id), false), id.clone());
                    report.finish_with(EntryState::Failed, e.to_string());
                    failed.push(report);
                }
            }
        }
        (described, failed)
    }

    async fn download_to_folder(
        &self,
        sources: &[Identifier],
        root: Arc<dyn DirectoryHandle>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let (described, failed) = self.describe_sources(sources).await;
        let initial_files = described.iter().filter(|(_, stat)| stat.is_file()).count() as u64;
        let run = self.run(initial_files, known_bytes(&described), cancel);
        run.reports.lock().extend(failed);

        join_all(described.into_iter().map(|(id, stat)| {
            let report = EntryReport::new(TransferEntry::from_stat(entry_name(&id), &stat), id.clone());
            run.download_entry(stat.kind, report, root.clone())
        }))
        .await;

        Ok(run.finish(cancel.is_cancelled()))
    }

    async fn download_blobs(
        &self,
        sources: &[Identifier],
        saver: &Arc<dyn BlobSaver>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let (described, failed) = self.describe_sources(sources).await;
        let initial_files = described.iter().filter(|(_, stat)| stat.is_file()).count() as u64;
        let run = self.run(initial_files, known_bytes(&described), cancel);
        run.reports.lock().extend(failed);

        for (id, stat) in described {
            if cancel.is_cancelled() {
                break;
            }
            let mut report =
                EntryReport::new(TransferEntry::from_stat(entry_name(&id), &stat), id.clone());
            if stat.is_directory() {
                warn!(source = %id, "Folders cannot be downloaded without a destination folder");
                report.finish_with(EntryState::Skipped, "Folders need a destination folder");
                run.record(report);
                continue;
            }
            report.advance(EntryState::Transferring);
            let result = run.save_blob(saver, &id, stat.size).await;
            run.settle(report, result);
        }

        Ok(run.finish(cancel.is_cancelled()))
    }

    async fn download_native(
        &self,
        sources: &[Identifier],
        dialog: &Arc<dyn SaveDialog>,
        copier: &Arc<dyn BulkCopier>,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let run = self.run(sources.len() as u64, None, cancel);
        let mut dismissed = false;

        for id in sources {
            if cancel.is_cancelled() {
                break;
            }
            let name = entry_name(id);
            let default_dir = self.last_download_dir();
            let Some(destination) = dialog.pick_save_path(default_dir.as_deref(), &name).await?
            else {
                debug!(source = %id, "Save dialog dismissed, cancelling remaining sources");
                dismissed = true;
                break;
            };
            if let Some(parent) = destination.parent() {
                *self.last_download_dir.lock() = Some(parent.to_path_buf());
            }

            let mut report = EntryReport::new(TransferEntry::new(name.clone(), false), id.clone());
            report.advance(EntryState::Transferring);
            let result = copier.copy(id, &destination).await;
            if result.is_ok() {
                run.op.complete_file();
                run.progress
                    .work(small_file_message(&name, &run.op.snapshot()));
            }
            run.settle(report, result);
        }

        Ok(run.finish(dismissed || cancel.is_cancelled()))
    }
}

fn entry_name(id: &Identifier) -> String {
    id.name().unwrap_or("/").to_string()
}

/// Sum of the source sizes, unless a folder makes the total unknown.
fn known_bytes(described: &[(Identifier, FileStat)]) -> Option<u64> {
    described
        .iter()
        .try_fold(0u64, |sum, (_, stat)| stat.is_file().then_some(sum + stat.size))
}

/// State of one `download` call.
struct DownloadRun<'a> {
    downloader: &'a Downloader,
    op: Arc<TransferOperation>,
    limiter: Limiter,
    progress: ProgressAggregator,
    cancel: &'a CancellationToken,
    reports: Mutex<Vec<EntryReport>>,
}

impl<'a> DownloadRun<'a> {
    fn fs(&self) -> &HandleFileSystem {
        &self.downloader.fs
    }

    fn config(&self) -> &TransferConfig {
        &self.downloader.config
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
                warn!(entry = %report.resource, error = %e, "Download of entry failed");
                report.finish_with(EntryState::Failed, e.to_string());
            }
        }
        self.record(report);
    }

    fn finish(self, cancelled: bool) -> TransferSummary {
        let snapshot = self.op.snapshot();
        self.progress
            .finish(summary_message("Downloaded", &snapshot, cancelled));
        let summary = TransferSummary::new(self.reports.into_inner(), &snapshot, cancelled);
        info!(
            completed = summary.files_completed,
            total = summary.files_total,
            failed = summary.failed(),
            skipped = summary.skipped(),
            cancelled,
            "Download finished"
        );
        summary
    }

    fn download_entry(
        &'a self,
        kind: HandleKind,
        mut report: EntryReport,
        dest: Arc<dyn DirectoryHandle>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let Some(permit) = self.limiter.acquire(self.cancel).await else {
                trace!(entry = %report.resource, "Not admitted after cancellation");
                return;
            };
            report.advance(EntryState::Transferring);

            match kind {
                HandleKind::File => {
                    let result = self.download_file(&mut report, &dest).await;
                    drop(permit);
                    self.settle(report, result);
                }
                HandleKind::Directory => {
                    self.op.add_total(1);
                    let prepared = self
                        .prepare_directory(&report.resource, report.name(), &dest)
                        .await;
                    drop(permit);
                    match prepared {
                        Ok((folder, children)) => {
                            self.download_children(&report.resource, children, folder)
                                .await;
                            if self.cancel.is_cancelled() {
                                self.settle(report, Err(TransferError::Cancelled));
                            } else {
                                self.op.complete_file();
                                self.settle(report, Ok(()));
                            }
                        }
                        Err(e) => self.settle(report, Err(e)),
                    }
                }
            }
        }
        .boxed()
    }

    /// Create the mirrored folder and list the source folder.
    async fn prepare_directory(
        &self,
        id: &Identifier,
        name: &str,
        dest: &Arc<dyn DirectoryHandle>,
    ) -> Result<(Arc<dyn DirectoryHandle>, Vec<(String, HandleKind)>)> {
        let folder = dest.get_directory_handle(name, true).await?;
        let children = self.fs().readdir(id).await?;
        let files = children
            .iter()
            .filter(|(_, kind)| *kind == HandleKind::File)
            .count();
        self.op.add_total(files as u64);
        Ok((folder, children))
    }

    async fn download_children(
        &'a self,
        parent: &Identifier,
        children: Vec<(String, HandleKind)>,
        folder: Arc<dyn DirectoryHandle>,
    ) {
        let (dirs, files): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|(_, kind)| *kind == HandleKind::Directory);

        join_all(files.into_iter().map(|(name, kind)| {
            let report = EntryReport::new(TransferEntry::new(name.clone(), false), parent.join(&name));
            self.download_entry(kind, report, folder.clone())
        }))
        .await;

        for (name, kind) in dirs {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = EntryReport::new(TransferEntry::new(name.clone(), true), parent.join(&name));
            self.download_entry(kind, report, folder.clone()).await;
        }
    }

    async fn download_file(&self, report: &mut EntryReport, dest: &Arc<dyn DirectoryHandle>) -> Result<()> {
        let id = &report.resource;
        let name = report.entry.name.as_str();
        let size = self.fs().stat(id).await?.size;
        report.entry.size = Some(size);
        let streamed = self.config().is_streamed(size);

        let target = dest.get_file_handle(name, true).await?;
        let mut writable = target.create_writable().await?;
        let pumped = if streamed {
            self.pump_streamed(id, name, size, writable.as_mut()).await
        } else {
            self.pump_buffered(id, writable.as_mut()).await
        };
        if let Err(e) = pumped {
            if let Err(abort) = writable.abort().await {
                warn!(entry = %id, error = %abort, "Failed to abort destination writable");
            }
            return Err(e);
        }
        writable.close().await?;

        self.op.complete_file();
        if !streamed {
            self.progress
                .work(small_file_message(name, &self.op.snapshot()));
        }
        Ok(())
    }

    async fn pump_buffered(
        &self,
        id: &Identifier,
        writable: &mut dyn WritableFileStream,
    ) -> Result<()> {
        let content = self.fs().read_file(id).await?;
        let len = content.len() as u64;
        writable.write(content).await?;
        self.op.add_bytes(len);
        Ok(())
    }

    async fn pump_streamed(
        &self,
        id: &Identifier,
        name: &str,
        size: u64,
        writable: &mut dyn WritableFileStream,
    ) -> Result<()> {
        let mut chunks = self
            .fs()
            .read_file_stream(id, ReadOptions::default(), self.cancel)
            .await?;
        let mut transferred = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let len = chunk.len() as u64;
            writable.write(chunk).await?;
            transferred += len;
            self.op.add_bytes(len);
            self.progress
                .work(large_file_message(name, transferred, size, &self.op.snapshot()));
            if self.cancel.is_cancelled() {
                return Err(ProviderError::cancelled(id).into());
            }
        }
        Ok(())
    }

    /// Read a file whole and hand it to the saver, or hand over its
    /// identifier when it is too large or unreadable.
    async fn save_blob(&self, saver: &Arc<dyn BlobSaver>, id: &Identifier, size: u64) -> Result<()> {
        let name = entry_name(id);
        if size > self.config().max_blob_size {
            debug!(source = %id, size, "File exceeds the blob ceiling, saving by reference");
            saver.save_reference(id).await?;
        } else {
            match self.fs().read_file(id).await {
                Ok(content) => {
                    let len = content.len() as u64;
                    saver.save_blob(&name, content).await?;
                    self.op.add_bytes(len);
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "Reading blob failed, saving by reference");
                    saver.save_reference(id).await?;
                }
            }
        }
        self.op.complete_file();
        self.progress
            .work(small_file_message(&name, &self.op.snapshot()));
        Ok(())
    }
}
