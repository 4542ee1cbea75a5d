use anyhow::Result;
use capfs_core::Identifier;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;

#[derive(ClapArgs)]
pub struct Args {
    /// Directory path to create
    pub path: String,

    /// Create parent directories as needed
    #[arg(short, long)]
    pub parents: bool,
}

#[instrument(level = "info", name = "cmd::mkdir", skip_all, fields(path = %args.path, parents = args.parents))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let fs = ctx.session.fs();
    let id = Identifier::new(&args.path);

    if args.parents {
        let mut current = Identifier::root();
        for (depth, component) in id.components().enumerate() {
            current = current.join(component);
            // The first component is a registered root.
            if depth > 0 {
                fs.mkdir(&current).await?;
            }
        }
    } else {
        fs.mkdir(&id).await?;
    }
    Ok(())
}
