//! Put command - upload local files and folders into the bridge.
//!
//! # Examples
//!
//! ```bash
//! # Upload a file and a folder into a root
//! capfs --root work=~/work put /work ./report.pdf ./photos
//!
//! # Replace existing entries without asking
//! capfs put --yes /work/docs ./notes.md
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use capfs_core::{Handle, Identifier};
use capfs_transfer::{Confirm, ConfirmRequest, ConfirmResult, TransferSource, Uploader};
use clap::Args as ClapArgs;
use tracing::{instrument, warn};

use super::{Context, InterruptGuard, check_summary};
use crate::local::{LocalDirectory, LocalFile};

#[derive(ClapArgs)]
pub struct Args {
    /// Destination folder in the bridge namespace
    pub target: String,

    /// Local files or folders to upload
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Replace existing entries without asking
    #[arg(short, long, conflicts_with = "no_clobber")]
    pub yes: bool,

    /// Keep existing entries without asking
    #[arg(short, long)]
    pub no_clobber: bool,
}

#[instrument(level = "info", name = "cmd::put", skip_all, fields(target = %args.target, sources = args.sources.len()))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let target = Identifier::new(&args.target);

    let mut sources = Vec::with_capacity(args.sources.len());
    for path in &args.sources {
        sources.push(local_source(path).await?);
    }

    let confirm: Arc<dyn Confirm> = if args.yes {
        Arc::new(FixedAnswer(true))
    } else if args.no_clobber {
        Arc::new(FixedAnswer(false))
    } else {
        Arc::new(PromptConfirm)
    };

    let uploader = Uploader::new(ctx.session.fs().clone(), confirm, ctx.reporter())
        .with_config(ctx.transfer.clone());
    let interrupt = InterruptGuard::install();
    let summary = uploader.upload(&target, sources, interrupt.token()).await?;

    check_summary(&summary, ctx.quiet)
}

/// Wrap a local path as an upload source.
async fn local_source(path: &Path) -> Result<TransferSource> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let path = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("Cannot resolve {}", path.display()))?;

    let handle = if meta.is_dir() {
        Handle::Directory(LocalDirectory::open(path))
    } else {
        Handle::File(LocalFile::open(path))
    };
    Ok(TransferSource::from_handle(handle))
}

/// Answers every question the same way.
struct FixedAnswer(bool);

#[async_trait]
impl Confirm for FixedAnswer {
    async fn confirm(&self, _request: ConfirmRequest) -> ConfirmResult {
        ConfirmResult { confirmed: self.0 }
    }
}

/// Asks on the terminal. Anything but "y" or "yes" declines.
struct PromptConfirm;

#[async_trait]
impl Confirm for PromptConfirm {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmResult {
        let answer = tokio::task::spawn_blocking(move || ask(&request)).await;
        let confirmed = match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read answer, keeping the existing entry");
                false
            }
            Err(e) => {
                warn!(error = %e, "Prompt task failed, keeping the existing entry");
                false
            }
        };
        ConfirmResult { confirmed }
    }
}

fn ask(request: &ConfirmRequest) -> io::Result<String> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{}", request.message)?;
    if let Some(detail) = &request.detail {
        writeln!(stderr, "{detail}")?;
    }
    write!(stderr, "{} [y/N]: ", request.primary_button)?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
