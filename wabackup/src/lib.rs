//! WaBackup - WhatsApp backup retrieval from Google Drive
//!
//! This library implements a resumable, concurrent, integrity-checked
//! download engine for WhatsApp backups stored in a Google account's
//! Drive App Data space:
//!
//! - `session`: authenticated session abstraction (the OAuth handshake
//!   itself lives with the caller)
//! - `manifest`: backup and file listing against the backup API
//! - `ledger`: per-path resume bookkeeping with exclusive writer access
//! - `fetch`: ranged, append-only chunk downloads
//! - `verify`: streaming MD5 verification of completed files
//! - `scheduler`: bounded worker pool with bounded retries
//! - `report`: per-entry outcomes and the run-level result
//! - `pipeline`: wires the components into a full sync run

pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod verify;

pub use config::Settings;
pub use error::RunError;
pub use manifest::{Backup, BackupEntry, EntryKind, ManifestClient, ManifestError};
pub use pipeline::{PipelineConfig, SyncPipeline};
pub use report::{human_size, FailureKind, RunReport, RunStatus, TransferOutcome};
pub use scheduler::{ProgressCallback, ProgressEvent, SchedulerConfig};
pub use session::{Session, SessionError, SessionProvider};
