//! WaBackup CLI - download WhatsApp backups from Google Drive.
//!
//! This binary provides a command-line interface to the wabackup
//! library: `info` and `list` inspect the account's backups, `sync`
//! downloads them with resume and checksum verification.

mod auth;
mod cli;
mod commands;
mod error;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose {
        "wabackup=debug,wabackup_cli=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if let Err(err) = commands::dispatch(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), err);
        std::process::exit(err.exit_code());
    }
}
