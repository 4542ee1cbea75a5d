use anyhow::Result;
use capfs_core::{Identifier, RenameOptions};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;

#[derive(ClapArgs)]
pub struct Args {
    /// Source file path
    pub source: String,

    /// Destination path
    pub dest: String,

    /// Replace an existing destination
    #[arg(short, long)]
    pub overwrite: bool,
}

#[instrument(level = "info", name = "cmd::mv", skip_all, fields(source = %args.source, dest = %args.dest))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let source = Identifier::new(&args.source);
    let dest = Identifier::new(&args.dest);
    ctx.session
        .fs()
        .rename(&source, &dest, RenameOptions { overwrite: args.overwrite })
        .await?;
    Ok(())
}
