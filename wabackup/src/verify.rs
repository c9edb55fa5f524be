//! Streaming MD5 verification of completed files.
//!
//! The recomputed digest against the manifest's declared digest is the
//! single source of truth for "this file is done". MD5 is fixed for
//! compatibility with external `md5sum -c` verification of the produced
//! checksum manifest.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::ledger::{LedgerFault, ResumeLedger};
use crate::manifest::BackupEntry;

/// Buffer size for reading files during digest calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex rendering of a digest.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Calculate the MD5 digest of a file, streamed in bounded buffers.
pub async fn file_md5_hex(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(to_hex(&hasher.finalize()))
}

/// Verifier verdict for one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Digest matched the manifest; the path is complete-verified.
    Verified,
    /// Digest differed; the local file was truncated to zero length.
    Mismatch { actual: String },
}

/// Errors raised while verifying an entry.
#[derive(Debug)]
pub enum VerifyError {
    /// The file could not be read or truncated.
    Io { path: PathBuf, source: io::Error },
    /// Ledger bookkeeping failed (fatal upstream).
    Fault(LedgerFault),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to verify {}: {}", path.display(), source)
            }
            Self::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Fault(fault) => Some(fault),
        }
    }
}

impl From<LedgerFault> for VerifyError {
    fn from(fault: LedgerFault) -> Self {
        Self::Fault(fault)
    }
}

/// Verify a completed entry against its manifest digest and record the
/// verdict in the ledger.
///
/// On mismatch the local file is truncated to zero length so a later
/// run starts clean: a wrong tail must never survive as something that
/// looks like resumable progress.
pub async fn verify_entry(
    ledger: &ResumeLedger,
    entry: &BackupEntry,
) -> Result<Verdict, VerifyError> {
    let absolute = ledger.absolute(&entry.path);
    let actual = file_md5_hex(&absolute).await.map_err(|e| VerifyError::Io {
        path: entry.path.clone(),
        source: e,
    })?;

    if actual == entry.md5_hex {
        ledger.mark_verified(&entry.path, true)?;
        return Ok(Verdict::Verified);
    }

    warn!(
        path = %entry.path.display(),
        expected = %entry.md5_hex,
        actual = %actual,
        "Checksum mismatch, truncating local file"
    );

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&absolute)
        .await
        .map_err(|e| VerifyError::Io {
            path: entry.path.clone(),
            source: e,
        })?;
    file.set_len(0).await.map_err(|e| VerifyError::Io {
        path: entry.path.clone(),
        source: e,
    })?;

    ledger.mark_verified(&entry.path, false)?;
    Ok(Verdict::Mismatch { actual })
}
