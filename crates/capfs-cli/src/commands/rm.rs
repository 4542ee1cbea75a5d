use anyhow::Result;
use capfs_core::{DeleteOptions, Identifier};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;

#[derive(ClapArgs)]
pub struct Args {
    /// Path to remove
    pub path: String,

    /// Remove directories and their contents recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore nonexistent paths
    #[arg(short, long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(path = %args.path, recursive = args.recursive))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let id = Identifier::new(&args.path);
    let opts = DeleteOptions {
        recursive: args.recursive,
    };

    match ctx.session.fs().delete(&id, opts).await {
        Err(e) if e.is_not_found() && args.force => Ok(()),
        result => Ok(result?),
    }
}
