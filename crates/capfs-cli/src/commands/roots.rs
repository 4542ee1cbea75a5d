//! Roots command - list the registered local roots.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Context;
use crate::output::create_table;

#[derive(ClapArgs)]
pub struct Args {
    /// Print identifiers only, one per line
    #[arg(short = '1')]
    pub one_per_line: bool,
}

#[instrument(level = "info", name = "cmd::roots", skip_all)]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let roots = ctx.session.roots();

    if args.one_per_line {
        for root in roots {
            println!("{}", root.id);
        }
        return Ok(());
    }

    if roots.is_empty() {
        eprintln!("No roots configured. Add one with --root NAME=PATH or in the config file.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Alias", "Identifier", "Path"]);
    for root in roots {
        table.add_row(vec![
            root.alias.clone(),
            root.id.to_string(),
            root.path.display().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
