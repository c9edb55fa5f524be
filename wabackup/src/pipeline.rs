//! End-to-end sync pipeline.
//!
//! Wires the components in dependency order: list the manifest, filter
//! the entries, run them through the transfer pool, and aggregate the
//! outcomes into a [`RunReport`]. Listing failures marked retryable are
//! retried with backoff before the run gives up; everything after
//! listing degrades per entry instead of aborting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::RunError;
use crate::fetch::{ChunkFetcher, FetcherConfig};
use crate::ledger::ResumeLedger;
use crate::manifest::{
    Backup, BackupEntry, EntryKind, ManifestClient, ManifestError, DEFAULT_API_BASE,
};
use crate::report::{RunReport, CHECKSUM_MANIFEST_NAME};
use crate::scheduler::{ProgressCallback, SchedulerConfig, TransferScheduler};
use crate::session::Session;

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory backups are materialized under.
    pub backup_root: PathBuf,
    /// API base for both listing and media endpoints.
    pub api_base: String,
    /// Transfer pool tuning.
    pub scheduler: SchedulerConfig,
    /// Per-attempt network timeout for transfers.
    pub attempt_timeout: Duration,
    /// Restrict the sync to one content kind.
    pub only: Option<EntryKind>,
    /// Total listing attempts before the run gives up.
    pub list_attempts: u32,
    /// First listing retry delay; doubles per further retry.
    pub list_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("backups"),
            api_base: DEFAULT_API_BASE.to_string(),
            scheduler: SchedulerConfig::default(),
            attempt_timeout: Duration::from_secs(120),
            only: None,
            list_attempts: 3,
            list_backoff: Duration::from_millis(500),
        }
    }
}

/// Narrow a backup list to the one the caller asked for.
///
/// `wanted` matches either the backup id or its full resource name.
pub fn select_backups<'a>(
    backups: &'a [Backup],
    wanted: Option<&str>,
) -> Result<Vec<&'a Backup>, RunError> {
    if backups.is_empty() {
        return Err(RunError::NoBackups);
    }
    match wanted {
        None => Ok(backups.iter().collect()),
        Some(wanted) => backups
            .iter()
            .find(|b| b.id() == wanted || b.name == wanted)
            .map(|b| vec![b])
            .ok_or_else(|| RunError::NoSuchBackup {
                wanted: wanted.to_string(),
            }),
    }
}

/// Drives one account's backups from listing to verified files on disk.
pub struct SyncPipeline {
    session: Session,
    client: ManifestClient,
    config: PipelineConfig,
}

impl SyncPipeline {
    pub fn new(session: Session, config: PipelineConfig) -> Self {
        let client = ManifestClient::with_base_url(session.clone(), config.api_base.clone());
        Self {
            session,
            client,
            config,
        }
    }

    /// List every backup on the account, retrying retryable failures.
    pub async fn backups(&self) -> Result<Vec<Backup>, RunError> {
        self.with_listing_retry(|| self.client.backups()).await
    }

    /// List every file of one backup, retrying retryable failures.
    pub async fn backup_files(&self, backup: &Backup) -> Result<Vec<BackupEntry>, RunError> {
        self.with_listing_retry(|| self.client.backup_files(backup))
            .await
    }

    /// Sync one backup to the local backup root.
    ///
    /// Every entry reaches a terminal outcome; the returned report
    /// carries them all. Only session, listing, and integrity failures
    /// abort the run as errors.
    pub async fn sync(
        &self,
        backup: &Backup,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<RunReport, RunError> {
        let mut entries = self.backup_files(backup).await?;
        if let Some(kind) = self.config.only {
            entries.retain(|e| e.kind == kind);
        }

        info!(
            backup = backup.id(),
            entries = entries.len(),
            root = %self.config.backup_root.display(),
            "Syncing backup"
        );

        tokio::fs::create_dir_all(&self.config.backup_root)
            .await
            .map_err(|e| RunError::Io {
                context: format!(
                    "failed to create backup root {}",
                    self.config.backup_root.display()
                ),
                source: e,
            })?;

        let ledger = Arc::new(ResumeLedger::new(&self.config.backup_root));
        let fetcher = ChunkFetcher::new(
            self.session.clone(),
            FetcherConfig {
                base_url: self.config.api_base.clone(),
                attempt_timeout: self.config.attempt_timeout,
            },
        );
        let scheduler = TransferScheduler::new(fetcher, self.config.scheduler.clone());

        let outcomes = scheduler.run(entries, ledger, cancel, progress).await?;
        let report = RunReport::new(outcomes);

        let manifest_path = self.config.backup_root.join(CHECKSUM_MANIFEST_NAME);
        report
            .write_checksum_manifest(&manifest_path)
            .map_err(|e| RunError::Io {
                context: format!("failed to write {}", manifest_path.display()),
                source: e,
            })?;

        info!(
            backup = backup.id(),
            completed = report.completed_count(),
            already_complete = report.already_complete_count(),
            failed = report.failed_count(),
            fetched = report.bytes_fetched(),
            "Sync finished"
        );
        Ok(report)
    }

    async fn with_listing_retry<T, F, Fut>(&self, mut op: F) -> Result<T, RunError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ManifestError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(ManifestError::Unavailable { reason })
                    if attempt < self.config.list_attempts =>
                {
                    let delay = self
                        .config
                        .list_backoff
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    warn!(attempt, %reason, delay_ms = delay.as_millis() as u64,
                        "Listing unavailable, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
