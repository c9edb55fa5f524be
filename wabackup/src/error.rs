//! Run-level error type.
//!
//! Entry-level failures are data (see [`crate::report::FailureKind`]);
//! a [`RunError`] means the run itself could not proceed or had to be
//! aborted.

use std::fmt;
use std::io;

use crate::ledger::LedgerFault;
use crate::manifest::ManifestError;
use crate::session::SessionError;

/// Errors that abort a whole run.
#[derive(Debug)]
pub enum RunError {
    /// No authenticated session could be obtained.
    Session(SessionError),
    /// The backup listing could not be retrieved.
    Manifest(ManifestError),
    /// Resume bookkeeping detected an impossible state. Local data may
    /// be corrupt; nothing was overwritten after detection.
    Integrity(LedgerFault),
    /// The requested backup does not exist on the account.
    NoSuchBackup { wanted: String },
    /// The account holds no backups at all.
    NoBackups,
    /// A local filesystem failure outside any single entry.
    Io { context: String, source: io::Error },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(err) => write!(f, "authentication failed: {}", err),
            Self::Manifest(err) => write!(f, "listing failed: {}", err),
            Self::Integrity(fault) => write!(f, "integrity fault: {}", fault),
            Self::NoSuchBackup { wanted } => write!(f, "no backup named {:?}", wanted),
            Self::NoBackups => write!(f, "no backups found for this account"),
            Self::Io { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            Self::Manifest(err) => Some(err),
            Self::Integrity(fault) => Some(fault),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SessionError> for RunError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<ManifestError> for RunError {
    fn from(err: ManifestError) -> Self {
        Self::Manifest(err)
    }
}

impl From<LedgerFault> for RunError {
    fn from(fault: LedgerFault) -> Self {
        Self::Integrity(fault)
    }
}
