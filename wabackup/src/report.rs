//! Per-entry outcomes and the run-level report.
//!
//! Every backup entry resolves to exactly one [`TransferOutcome`]; the
//! aggregator folds them into a [`RunReport`] and never lets one
//! entry's failure block another's completion.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::manifest::EntryKind;

/// Name of the checksum manifest produced after a sync run.
pub const CHECKSUM_MANIFEST_NAME: &str = "md5sum.txt";

/// Terminal result for one backup entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Downloaded (fully or from a resume point) and verified.
    Completed { bytes_fetched: u64 },
    /// Already present and verified; no network transfer happened.
    AlreadyComplete,
    /// The entry failed; the run continued with the rest.
    Failed(FailureKind),
}

impl TransferOutcome {
    /// Whether this outcome counts toward run-level success.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { bytes_fetched } => {
                write!(f, "completed ({} fetched)", human_size(*bytes_fetched))
            }
            Self::AlreadyComplete => write!(f, "already complete"),
            Self::Failed(kind) => write!(f, "failed: {}", kind),
        }
    }
}

/// Why an entry failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Permanent server-side rejection (4xx).
    Rejected { status: u16, reason: String },
    /// Transient failures exhausted the retry budget.
    Transient { reason: String, attempts: u32 },
    /// Recomputed digest differed from the manifest; local bytes were
    /// discarded so the next run starts clean.
    ChecksumMismatch { expected: String, actual: String },
    /// Local disk failure.
    Io { reason: String },
    /// The run was cancelled before this entry finished.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, reason } => write!(f, "rejected ({} {})", status, reason),
            Self::Transient { reason, attempts } => {
                write!(f, "gave up after {} attempts: {}", attempts, reason)
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch (expected {}, got {})", expected, actual)
            }
            Self::Io { reason } => write!(f, "disk error: {}", reason),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry's identity plus its outcome.
#[derive(Clone, Debug)]
pub struct EntryOutcome {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub md5_hex: String,
    pub outcome: TransferOutcome,
}

/// Run-level result classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Every entry completed or was already complete.
    Success,
    /// At least one entry failed; the rest were not blocked by it.
    PartialFailure,
}

/// Aggregated outcomes for one sync run.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<EntryOutcome>,
}

impl RunReport {
    /// Build a report from collected outcomes.
    pub fn new(outcomes: Vec<EntryOutcome>) -> Self {
        Self { outcomes }
    }

    /// All per-entry outcomes, in resolution order.
    pub fn outcomes(&self) -> &[EntryOutcome] {
        &self.outcomes
    }

    /// Entries that failed, with their failure kinds.
    pub fn failed(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, TransferOutcome::Failed(_)))
    }

    /// Number of entries downloaded and verified this run.
    pub fn completed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, TransferOutcome::Completed { .. }))
            .count()
    }

    /// Number of entries that were already verified-complete.
    pub fn already_complete_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == TransferOutcome::AlreadyComplete)
            .count()
    }

    /// Number of failed entries.
    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// Total bytes moved over the network this run.
    pub fn bytes_fetched(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.outcome {
                TransferOutcome::Completed { bytes_fetched } => bytes_fetched,
                _ => 0,
            })
            .sum()
    }

    /// Total declared size of all successfully present entries.
    pub fn bytes_verified(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_success())
            .map(|o| o.size)
            .sum()
    }

    /// Run-level classification.
    pub fn status(&self) -> RunStatus {
        if self.failed_count() == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        }
    }

    /// Write the externally verifiable checksum manifest for every
    /// successful entry, in `"{md5} *{path}"` format (`md5sum -c`
    /// compatible).
    ///
    /// Merges with an existing manifest: a run that syncs several
    /// backups into one root accumulates all of their lines, and a
    /// re-synced path replaces its previous line instead of
    /// duplicating it.
    pub fn write_checksum_manifest(&self, path: &Path) -> io::Result<()> {
        let mut lines: Vec<(String, String)> = Vec::new();
        match std::fs::read_to_string(path) {
            Ok(existing) => {
                for line in existing.lines() {
                    if let Some((digest, name)) = line.split_once(" *") {
                        lines.push((name.to_string(), digest.to_string()));
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        for outcome in self.outcomes.iter().filter(|o| o.outcome.is_success()) {
            let name = outcome.path.to_string_lossy().to_string();
            match lines.iter_mut().find(|(n, _)| *n == name) {
                Some((_, digest)) => *digest = outcome.md5_hex.clone(),
                None => lines.push((name, outcome.md5_hex.clone())),
            }
        }

        let mut contents = String::new();
        for (name, digest) in &lines {
            contents.push_str(digest);
            contents.push_str(" *");
            contents.push_str(name);
            contents.push('\n');
        }
        std::fs::write(path, contents)
    }
}

/// Human-readable rendering of a byte count (`1.50MiB`).
pub fn human_size(size: u64) -> String {
    const UNITS: [&str; 9] = ["B", "kiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.2}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2}{}", value, UNITS[UNITS.len() - 1])
}
