//! List command - list directory contents.
//!
//! # Examples
//!
//! ```bash
//! # List registered roots
//! capfs ls /
//!
//! # List with details
//! capfs --root work=~/work ls -l /work/docs
//! ```

use anyhow::{Result, bail};
use capfs_core::{HandleKind, Identifier};
use capfs_transfer::format_bytes;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;
use crate::output::{create_table, format_entry_type};

#[derive(ClapArgs)]
pub struct Args {
    /// Path in the bridge namespace (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Show detailed information
    #[arg(short, long)]
    pub long: bool,

    /// One entry per line (script-friendly)
    #[arg(short = '1')]
    pub one_per_line: bool,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub async fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let fs = ctx.session.fs();
    let dir = Identifier::new(&args.path);

    let entries: Vec<(String, HandleKind)> = if dir.is_root() {
        fs.store()
            .registered_directories()
            .await
            .into_iter()
            .filter_map(|id| id.name().map(|n| (n.to_string(), HandleKind::Directory)))
            .collect()
    } else {
        if !fs.stat(&dir).await?.is_directory() {
            bail!("Not a directory: {dir}");
        }
        fs.readdir(&dir).await?
    };

    if args.long {
        let mut table = create_table();
        table.set_header(vec!["Type", "Size", "Name"]);
        for (name, kind) in &entries {
            let (size, shown) = match kind {
                HandleKind::Directory => ("-".to_string(), format!("{name}/")),
                HandleKind::File => {
                    let stat = fs.stat(&dir.join(name)).await?;
                    (format_bytes(stat.size), name.clone())
                }
            };
            table.add_row(vec![format_entry_type(*kind).to_string(), size, shown]);
        }
        println!("{table}");
        return Ok(());
    }

    let shown: Vec<String> = entries
        .iter()
        .map(|(name, kind)| match kind {
            HandleKind::Directory => format!("{name}/"),
            HandleKind::File => name.clone(),
        })
        .collect();

    if args.one_per_line || shown.len() > 10 {
        for entry in shown {
            println!("{entry}");
        }
    } else if !shown.is_empty() {
        println!("{}", shown.join("  "));
    }
    Ok(())
}
