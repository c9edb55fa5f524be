//! Backup manifest types and the remote listing client.
//!
//! The manifest is the listing of every file-equivalent unit in a
//! device's backup: name, declared size, and expected MD5 digest. This
//! module provides:
//! - Entry and backup types (`BackupEntry`, `Backup`, `EntryKind`)
//! - The paged HTTP lister (`ManifestClient`)
//!
//! Entries are immutable once listed; everything downstream treats them
//! as snapshots of the remote state at listing time.

mod client;

pub use client::{ManifestClient, DEFAULT_API_BASE};

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Content classification of a backup entry.
///
/// Derived from the logical path; affects reporting and filtering only,
/// never transfer logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// The chat message database (`Databases/`).
    ChatDatabase,
    /// A media item (`Media/`).
    Media,
    /// Anything else (file maps, settings snapshots, ...).
    Metadata,
}

impl EntryKind {
    /// Classify an entry by its logical path components.
    pub fn classify(path: &std::path::Path) -> Self {
        for component in path.components() {
            match component.as_os_str().to_str() {
                Some("Databases") => return Self::ChatDatabase,
                Some("Media") => return Self::Media,
                _ => {}
            }
        }
        Self::Metadata
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChatDatabase => write!(f, "chatdb"),
            Self::Media => write!(f, "media"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// One file-equivalent unit of the remote backup.
#[derive(Clone, Debug)]
pub struct BackupEntry {
    /// Full remote resource name
    /// (`clients/wa/backups/<id>/files/<path...>`).
    pub remote_name: String,
    /// Path the file is materialized under, relative to the backup root.
    pub path: PathBuf,
    /// Declared size in bytes.
    pub size: u64,
    /// Expected MD5 digest, lowercase hex.
    pub md5_hex: String,
    /// Content classification.
    pub kind: EntryKind,
}

impl BackupEntry {
    /// Remote name with the characters the media endpoint cannot take
    /// raw escaped, as the original extractor does.
    pub fn escaped_name(&self) -> String {
        self.remote_name.replace('%', "%25").replace('+', "%2B")
    }
}

/// One backup belonging to the device identity.
#[derive(Clone, Debug)]
pub struct Backup {
    /// Full resource name (`clients/wa/backups/<id>`).
    pub name: String,
    /// Declared total size of the backup in bytes.
    pub size_bytes: u64,
    /// Server-side last update timestamp (RFC 3339).
    pub update_time: String,
    /// Parsed metadata blob, when the server supplied one.
    pub metadata: Option<BackupMetadata>,
}

impl Backup {
    /// The trailing identifier component of the backup name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Backup metadata as reported by the API.
///
/// Sizes arrive as decimal strings; use the `*_bytes` accessors for
/// numeric values.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupMetadata {
    pub backup_size: String,
    pub chatdb_size: String,
    pub media_size: String,
    pub video_size: String,
    pub version_of_app_when_backup: String,
    pub password_protected_backup_enabled: Option<bool>,
    pub num_of_messages: u64,
    pub num_of_media_files: u64,
    pub num_of_photos: u64,
    pub include_videos_in_backup: Option<bool>,
}

impl BackupMetadata {
    pub fn backup_size_bytes(&self) -> Option<u64> {
        self.backup_size.parse().ok()
    }

    pub fn chatdb_size_bytes(&self) -> Option<u64> {
        self.chatdb_size.parse().ok()
    }

    pub fn media_size_bytes(&self) -> Option<u64> {
        self.media_size.parse().ok()
    }

    pub fn video_size_bytes(&self) -> Option<u64> {
        self.video_size.parse().ok()
    }
}

/// Errors raised by the manifest lister.
#[derive(Debug)]
pub enum ManifestError {
    /// The session token was rejected. Not retryable here; surfaced
    /// upward so the run aborts before any transfer starts.
    AuthExpired,

    /// The listing endpoint could not be reached or answered with a
    /// server-side failure. Retryable with backoff.
    Unavailable { reason: String },

    /// The server answered with something this client cannot use.
    Malformed { reason: String },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "session token rejected by the backup API"),
            Self::Unavailable { reason } => {
                write!(f, "backup manifest unavailable: {}", reason)
            }
            Self::Malformed { reason } => {
                write!(f, "backup manifest response malformed: {}", reason)
            }
        }
    }
}

impl std::error::Error for ManifestError {}
