//! Cat command - stream a file to stdout.

use anyhow::{Context as _, Result};
use capfs_core::{Identifier, ReadOptions};
use clap::Args as ClapArgs;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use super::{Context, InterruptGuard};

#[derive(ClapArgs)]
pub struct Args {
    /// File path in the bridge namespace
    pub path: String,

    /// Start reading at this byte offset
    #[arg(long)]
    pub offset: Option<u64>,

    /// Read at most this many bytes
    #[arg(long)]
    pub length: Option<u64>,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(path = %args.path))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let id = Identifier::new(&args.path);
    let opts = ReadOptions {
        position: args.offset,
        length: args.length,
    };
    let interrupt = InterruptGuard::install();
    let mut chunks = ctx
        .session
        .fs()
        .read_file_stream(&id, opts, interrupt.token())
        .await?;

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = chunks.try_next().await? {
        stdout
            .write_all(&chunk)
            .await
            .context("Failed to write to stdout")?;
    }
    stdout.flush().await.context("Failed to write to stdout")?;
    Ok(())
}
