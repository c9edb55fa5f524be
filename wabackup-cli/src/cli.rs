//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use wabackup::EntryKind;

#[derive(Parser)]
#[command(
    name = "wabackup",
    version,
    about = "Download and verify WhatsApp backups stored in Google Drive"
)]
pub struct Cli {
    /// Settings file (defaults to ./settings.cfg, then the user config
    /// directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show account backups and their metadata.
    Info {
        /// Operate on one backup id instead of all of them.
        #[arg(long)]
        backup: Option<String>,
    },

    /// List the files of each backup.
    List {
        /// Operate on one backup id instead of all of them.
        #[arg(long)]
        backup: Option<String>,

        /// Restrict to one content kind.
        #[arg(long, value_enum)]
        only: Option<OnlyKind>,
    },

    /// Download each backup, resuming and verifying along the way.
    Sync {
        /// Operate on one backup id instead of all of them.
        #[arg(long)]
        backup: Option<String>,

        /// Restrict to one content kind.
        #[arg(long, value_enum)]
        only: Option<OnlyKind>,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,

        /// Override the configured number of concurrent transfers.
        #[arg(long)]
        jobs: Option<usize>,

        /// Override the configured backup directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Content kind filter as exposed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OnlyKind {
    Chatdb,
    Media,
    Metadata,
}

impl From<OnlyKind> for EntryKind {
    fn from(kind: OnlyKind) -> Self {
        match kind {
            OnlyKind::Chatdb => EntryKind::ChatDatabase,
            OnlyKind::Media => EntryKind::Media,
            OnlyKind::Metadata => EntryKind::Metadata,
        }
    }
}
