#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod local;
mod output;
mod session;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use capfs_core::{FsErrorKind, HandleError, ProviderError};
use capfs_transfer::TransferError;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    Context, IncompleteTransfer, cat, get, ls, mkdir, mv, put, rm, roots, stat,
};
use crate::config::{Config, parse_root_arg};
use crate::session::Session;

/// Command-line interface for the capability handle bridge
#[derive(Parser)]
#[command(name = "capfs")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # List a local folder through the bridge
    capfs --root work=~/work ls -l /work

    # Upload files and folders
    capfs --root work=~/work put /work ./report.pdf ./photos

    # Download a folder
    capfs --root work=~/work get /work/photos --dest ./backup

    # Use roots from ~/.config/capfs/config.toml
    capfs roots
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: the per-user config file)
    #[arg(long, value_name = "FILE", env = "CAPFS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Register a local folder as a root (repeatable)
    #[arg(long = "root", value_name = "NAME=PATH", value_parser = parse_root_arg, global = true)]
    roots: Vec<(String, PathBuf)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered roots
    Roots(roots::Args),

    /// List directory contents
    Ls(ls::Args),

    /// Stream a file to stdout
    Cat(cat::Args),

    /// Show metadata of a file or folder
    Stat(stat::Args),

    /// Create a directory
    Mkdir(mkdir::Args),

    /// Remove a file or directory
    Rm(rm::Args),

    /// Move a file
    Mv(mv::Args),

    /// Upload local files and folders
    Put(put::Args),

    /// Download files and folders
    Get(get::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    for (alias, path) in &cli.roots {
        config.add_root(alias.clone(), path.clone())?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(dispatch(cli.command, config, cli.quiet))
}

async fn dispatch(command: Commands, config: Config, quiet: bool) -> Result<()> {
    let ctx = Context {
        session: Session::open(&config.roots).await?,
        transfer: config.transfer,
        quiet,
    };

    match command {
        Commands::Roots(args) => roots::execute(&ctx, &args),
        Commands::Ls(args) => ls::execute(&ctx, &args).await,
        Commands::Cat(args) => cat::execute(&ctx, &args).await,
        Commands::Stat(args) => stat::execute(&ctx, &args).await,
        Commands::Mkdir(args) => mkdir::execute(&ctx, &args).await,
        Commands::Rm(args) => rm::execute(&ctx, &args).await,
        Commands::Mv(args) => mv::execute(&ctx, &args).await,
        Commands::Put(args) => put::execute(&ctx, &args).await,
        Commands::Get(args) => get::execute(&ctx, &args).await,
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn exit_code_for(kind: FsErrorKind) -> u8 {
    match kind {
        FsErrorKind::FileNotFound => exit_code::NOT_FOUND,
        FsErrorKind::FileExists => exit_code::ALREADY_EXISTS,
        FsErrorKind::Unavailable => exit_code::PERMISSION_DENIED,
        FsErrorKind::Cancelled => exit_code::CANCELLED,
        FsErrorKind::Unknown => exit_code::GENERAL_ERROR,
    }
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(provider_err) = cause.downcast_ref::<ProviderError>() {
            return exit_code_for(provider_err.kind());
        }

        if let Some(transfer_err) = cause.downcast_ref::<TransferError>() {
            match transfer_err {
                TransferError::Provider(provider_err) => return exit_code_for(provider_err.kind()),
                TransferError::Handle(handle_err) => {
                    return exit_code_for(FsErrorKind::from(handle_err));
                }
                other if other.is_cancelled() => return exit_code::CANCELLED,
                _ => {}
            }
        }

        if let Some(handle_err) = cause.downcast_ref::<HandleError>() {
            return exit_code_for(FsErrorKind::from(handle_err));
        }

        if cause.downcast_ref::<IncompleteTransfer>().is_some() {
            return exit_code::INCOMPLETE;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                io::ErrorKind::Interrupted => return exit_code::CANCELLED,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use capfs_core::Identifier;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_categorize_provider_errors() {
        let id = Identifier::new("/work/a.txt");
        let e = anyhow::Error::new(ProviderError::not_found(&id));
        assert_eq!(categorize_error(&e), exit_code::NOT_FOUND);

        let e = anyhow::Error::new(ProviderError::exists(&id)).context("Upload failed");
        assert_eq!(categorize_error(&e), exit_code::ALREADY_EXISTS);

        let e = anyhow::Error::new(TransferError::Provider(ProviderError::unavailable(&id, "no")));
        assert_eq!(categorize_error(&e), exit_code::PERMISSION_DENIED);
    }

    #[test]
    fn test_categorize_transfer_outcomes() {
        let e = anyhow::Error::new(TransferError::Cancelled);
        assert_eq!(categorize_error(&e), exit_code::CANCELLED);

        let e = anyhow::Error::new(IncompleteTransfer { failed: 1, total: 3 });
        assert_eq!(categorize_error(&e), exit_code::INCOMPLETE);

        let e = anyhow::Error::new(TransferError::collaborator("blob saver", "disk full"));
        assert_eq!(categorize_error(&e), exit_code::GENERAL_ERROR);
    }
}
