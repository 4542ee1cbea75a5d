use anyhow::Result;
use capfs_core::Identifier;
use chrono::{DateTime, Local};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;
use crate::output::format_entry_type;

#[derive(ClapArgs)]
pub struct Args {
    /// Path in the bridge namespace
    pub path: String,
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let id = Identifier::new(&args.path);
    let stat = ctx.session.fs().stat(&id).await?;
    let modified: DateTime<Local> = stat.mtime.into();

    println!("Path:     {id}");
    println!("Type:     {}", format_entry_type(stat.kind));
    if stat.is_file() {
        println!("Size:     {} bytes", stat.size);
        println!("Modified: {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
