use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use minidb::{Table, repl};

/// A tiny single-table database backed by an on-disk B-tree.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Database file; created when it does not exist.
    database: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let table = Table::open(&cli.database)
        .with_context(|| format!("cannot open database {}", cli.database.display()))?;

    repl::run(table, io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}
