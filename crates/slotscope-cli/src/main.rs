//! CLI tool for Solidity storage inspection
//!
//! This binary provides the `slotscope` command-line interface for resolving
//! storage layouts from a contract model and reading values from a node.

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod config;
mod formatters;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    commands::run(&cli).await
}
