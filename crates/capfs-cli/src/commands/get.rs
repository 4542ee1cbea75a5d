//! Get command - download bridge entries to the local file system.
//!
//! Three modes, one per download environment:
//!
//! - default: mirror entries into `--dest` through directory handles
//! - `--blob`: read each file whole and save it by name (folders are skipped)
//! - `--ask`: prompt for a save path per entry, then copy it there
//!
//! # Examples
//!
//! ```bash
//! capfs --root work=~/work get /work/docs --dest ./backup
//! capfs get --ask /work/report.pdf
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use capfs_core::{DirectoryHandle, HandleFileSystem, Identifier, ReadOptions};
use capfs_transfer::{
    BlobSaver, BulkCopier, DirectoryPicker, DownloadEnvironment, Downloader, SaveDialog,
    TransferError,
};
use clap::Args as ClapArgs;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{Context, InterruptGuard, check_summary};
use crate::local::LocalDirectory;

#[derive(ClapArgs)]
pub struct Args {
    /// Entries to download
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Local folder receiving the downloads
    #[arg(short, long, default_value = ".")]
    pub dest: PathBuf,

    /// Save whole files by name instead of mirroring folders
    #[arg(long, conflicts_with = "ask")]
    pub blob: bool,

    /// Prompt for a save path per entry
    #[arg(long)]
    pub ask: bool,
}

#[instrument(level = "info", name = "cmd::get", skip_all, fields(sources = args.sources.len(), dest = %args.dest.display()))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    tokio::fs::create_dir_all(&args.dest)
        .await
        .with_context(|| format!("Cannot create {}", args.dest.display()))?;
    let dest = tokio::fs::canonicalize(&args.dest)
        .await
        .with_context(|| format!("Cannot resolve {}", args.dest.display()))?;

    let interrupt = InterruptGuard::install();
    let fs = ctx.session.fs().clone();
    let env = if args.blob {
        DownloadEnvironment::Blob(Arc::new(FolderBlobSaver {
            fs: fs.clone(),
            dir: dest,
            cancel: interrupt.token().clone(),
        }))
    } else if args.ask {
        DownloadEnvironment::Native {
            dialog: Arc::new(PromptSaveDialog { fallback_dir: dest }),
            copier: Arc::new(StreamCopier {
                fs: fs.clone(),
                cancel: interrupt.token().clone(),
            }),
        }
    } else {
        DownloadEnvironment::Handles(Arc::new(FolderPicker {
            folder: LocalDirectory::open(dest),
        }))
    };

    let sources: Vec<Identifier> = args.sources.iter().map(Identifier::new).collect();
    let downloader = Downloader::new(fs, env, ctx.reporter()).with_config(ctx.transfer.clone());
    let summary = downloader.download(&sources, interrupt.token()).await?;

    check_summary(&summary, ctx.quiet)
}

/// Stream a bridge file into a local path.
async fn copy_to_path(
    fs: &HandleFileSystem,
    source: &Identifier,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<u64, TransferError> {
    let io_failed = |e: io::Error| {
        TransferError::collaborator("local copy", format!("{}: {e}", destination.display()))
    };

    let mut chunks = fs
        .read_file_stream(source, ReadOptions::default(), cancel)
        .await?;
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(io_failed)?;
    let mut written = 0u64;
    while let Some(chunk) = chunks.try_next().await? {
        file.write_all(&chunk).await.map_err(io_failed)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_failed)?;
    debug!(source = %source, destination = %destination.display(), bytes = written, "Copied");
    Ok(written)
}

/// Always picks the `--dest` folder.
struct FolderPicker {
    folder: Arc<LocalDirectory>,
}

#[async_trait]
impl DirectoryPicker for FolderPicker {
    async fn pick_directory(&self) -> capfs_transfer::Result<Option<Arc<dyn DirectoryHandle>>> {
        let folder: Arc<dyn DirectoryHandle> = self.folder.clone();
        Ok(Some(folder))
    }
}

/// Saves blobs into a folder; references are streamed there instead.
struct FolderBlobSaver {
    fs: Arc<HandleFileSystem>,
    dir: PathBuf,
    cancel: CancellationToken,
}

#[async_trait]
impl BlobSaver for FolderBlobSaver {
    async fn save_blob(&self, name: &str, content: Bytes) -> capfs_transfer::Result<()> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, &content).await.map_err(|e| {
            TransferError::collaborator("blob saver", format!("{}: {e}", path.display()))
        })
    }

    async fn save_reference(&self, resource: &Identifier) -> capfs_transfer::Result<()> {
        let name = resource.name().unwrap_or("download");
        copy_to_path(&self.fs, resource, &self.dir.join(name), &self.cancel).await?;
        Ok(())
    }
}

/// Asks on the terminal where each entry goes.
///
/// An empty answer accepts the suggested path; end of input dismisses the
/// prompt.
struct PromptSaveDialog {
    fallback_dir: PathBuf,
}

#[async_trait]
impl SaveDialog for PromptSaveDialog {
    async fn pick_save_path(
        &self,
        default_dir: Option<&Path>,
        suggested_name: &str,
    ) -> capfs_transfer::Result<Option<PathBuf>> {
        let suggested = default_dir
            .unwrap_or(&self.fallback_dir)
            .join(suggested_name);
        let prompt = suggested.clone();

        let answer = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut stderr = io::stderr().lock();
            write!(stderr, "Save to [{}]: ", prompt.display())?;
            stderr.flush()?;
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })
        .await
        .map_err(|e| TransferError::collaborator("save dialog", e.to_string()))?
        .map_err(|e| TransferError::collaborator("save dialog", e.to_string()))?;

        Ok(answer.map(|line| {
            let line = line.trim();
            if line.is_empty() {
                suggested
            } else {
                PathBuf::from(line)
            }
        }))
    }
}

/// Copies single files by streaming them out of the bridge.
struct StreamCopier {
    fs: Arc<HandleFileSystem>,
    cancel: CancellationToken,
}

#[async_trait]
impl BulkCopier for StreamCopier {
    async fn copy(&self, source: &Identifier, destination: &Path) -> capfs_transfer::Result<()> {
        if self.fs.stat(source).await?.is_directory() {
            return Err(TransferError::collaborator(
                "local copy",
                format!("{source} is a folder; use the default mode to mirror folders"),
            ));
        }
        copy_to_path(&self.fs, source, destination, &self.cancel).await?;
        Ok(())
    }
}
