//! Transfer scheduler: a bounded worker pool over the pending entries.
//!
//! - Each entry is claimed by exactly one worker, which owns its whole
//!   attempt cycle (fetch, retries, verification). Combined with the
//!   ledger's writer guard this keeps every path single-writer.
//! - Transient failures are retried with exponential backoff up to a
//!   bounded budget; rejections and disk failures are terminal for the
//!   entry but never for the run.
//! - A ledger integrity fault cancels the whole run: the bookkeeping
//!   can no longer be trusted, so continuing would risk corrupt output.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{ChunkFetcher, FetchError};
use crate::ledger::{FileStatus, LedgerFault, ResumeLedger};
use crate::manifest::BackupEntry;
use crate::report::{EntryOutcome, FailureKind, TransferOutcome};
use crate::verify::{verify_entry, Verdict, VerifyError};

/// Scheduler tuning knobs.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of concurrent transfer workers.
    pub concurrency: usize,
    /// Retries after the first failed attempt of an entry.
    pub max_retries: u32,
    /// First retry delay; doubles on every further retry.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_cap: Duration,
    /// Process entries smallest-first instead of listing order.
    pub smallest_first: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            smallest_first: false,
        }
    }
}

/// Progress notifications emitted while the pool runs.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A worker claimed the entry and started transferring it.
    Started { path: std::path::PathBuf, size: u64 },
    /// The entry reached a terminal outcome.
    Resolved {
        path: std::path::PathBuf,
        outcome: TransferOutcome,
    },
}

/// Callback invoked for every [`ProgressEvent`].
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Runs entries through fetch and verification on a bounded pool.
pub struct TransferScheduler {
    fetcher: Arc<ChunkFetcher>,
    config: SchedulerConfig,
}

impl TransferScheduler {
    pub fn new(fetcher: ChunkFetcher, config: SchedulerConfig) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            config,
        }
    }

    /// Process every entry to a terminal outcome.
    ///
    /// Returns the per-entry outcomes in resolution order. The only
    /// error is a ledger integrity fault, which cancels all workers and
    /// aborts the run.
    pub async fn run(
        &self,
        mut entries: Vec<BackupEntry>,
        ledger: Arc<ResumeLedger>,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<EntryOutcome>, LedgerFault> {
        if self.config.smallest_first {
            entries.sort_by_key(|e| e.size);
        }

        info!(
            entries = entries.len(),
            concurrency = self.config.concurrency,
            "Starting transfer pool"
        );

        let queue = Arc::new(Mutex::new(entries.into_iter().collect::<VecDeque<_>>()));
        let workers = self.config.concurrency.max(1);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            let progress = progress.clone();
            let config = self.config.clone();

            handles.push(tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let entry = match queue.lock().pop_front() {
                        Some(entry) => entry,
                        None => break,
                    };

                    if let Some(callback) = &progress {
                        callback(ProgressEvent::Started {
                            path: entry.path.clone(),
                            size: entry.size,
                        });
                    }

                    let outcome =
                        process_entry(&fetcher, &ledger, &entry, &cancel, &config).await;
                    let outcome = match outcome {
                        Ok(outcome) => outcome,
                        Err(fault) => {
                            error!(worker_id, %fault, "Integrity fault, cancelling run");
                            cancel.cancel();
                            return Err(fault);
                        }
                    };

                    debug!(
                        worker_id,
                        path = %entry.path.display(),
                        outcome = %outcome,
                        "Entry resolved"
                    );
                    if let Some(callback) = &progress {
                        callback(ProgressEvent::Resolved {
                            path: entry.path.clone(),
                            outcome: outcome.clone(),
                        });
                    }

                    outcomes.push(EntryOutcome {
                        path: entry.path,
                        kind: entry.kind,
                        size: entry.size,
                        md5_hex: entry.md5_hex,
                        outcome,
                    });
                }
                Ok(outcomes)
            }));
        }

        let mut all = Vec::new();
        let mut fault = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcomes)) => all.extend(outcomes),
                Ok(Err(f)) => fault = Some(f),
                Err(join_err) => {
                    // A worker that never returned took its collected
                    // outcomes with it; stop the rest rather than
                    // report a silently incomplete run.
                    error!(error = %join_err, "Transfer worker terminated abnormally");
                    cancel.cancel();
                }
            }
        }

        match fault {
            Some(fault) => Err(fault),
            None => Ok(all),
        }
    }
}

/// Drive one entry to a terminal outcome, retrying transient failures.
async fn process_entry(
    fetcher: &ChunkFetcher,
    ledger: &ResumeLedger,
    entry: &BackupEntry,
    cancel: &CancellationToken,
    config: &SchedulerConfig,
) -> Result<TransferOutcome, LedgerFault> {
    if ledger.state(&entry.path, entry.size)?.status == FileStatus::CompleteVerified {
        return Ok(TransferOutcome::AlreadyComplete);
    }

    let mut attempt = 0u32;
    let mut total_fetched = 0u64;
    // One in-run second chance when a stale complete file fails
    // verification; the verifier already truncated it.
    let mut refetched_stale = false;

    loop {
        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Failed(FailureKind::Cancelled));
        }
        attempt += 1;

        match fetcher.fetch(entry, ledger, cancel).await {
            Ok(summary) => {
                total_fetched += summary.bytes_fetched;

                match verify_entry(ledger, entry).await {
                    Ok(Verdict::Verified) => {
                        return Ok(if total_fetched == 0 {
                            TransferOutcome::AlreadyComplete
                        } else {
                            TransferOutcome::Completed {
                                bytes_fetched: total_fetched,
                            }
                        });
                    }
                    Ok(Verdict::Mismatch { actual }) => {
                        if summary.bytes_fetched == 0 && !refetched_stale {
                            // A leftover file from before this run; it
                            // was truncated, so fetch it for real now.
                            refetched_stale = true;
                            continue;
                        }
                        return Ok(TransferOutcome::Failed(FailureKind::ChecksumMismatch {
                            expected: entry.md5_hex.clone(),
                            actual,
                        }));
                    }
                    Err(VerifyError::Io { path, source }) => {
                        return Ok(TransferOutcome::Failed(FailureKind::Io {
                            reason: format!("{}: {}", path.display(), source),
                        }));
                    }
                    Err(VerifyError::Fault(fault)) => return Err(fault),
                }
            }
            Err(err) if err.is_retryable() && attempt <= config.max_retries => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    path = %entry.path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(TransferOutcome::Failed(FailureKind::Cancelled));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(FetchError::Transient { reason }) => {
                return Ok(TransferOutcome::Failed(FailureKind::Transient {
                    reason,
                    attempts: attempt,
                }));
            }
            Err(FetchError::Incomplete { received, declared }) => {
                return Ok(TransferOutcome::Failed(FailureKind::Transient {
                    reason: format!("stream ended at {} of {} bytes", received, declared),
                    attempts: attempt,
                }));
            }
            Err(FetchError::Rejected { status, reason }) => {
                return Ok(TransferOutcome::Failed(FailureKind::Rejected {
                    status,
                    reason,
                }));
            }
            Err(FetchError::Cancelled) => {
                return Ok(TransferOutcome::Failed(FailureKind::Cancelled));
            }
            Err(FetchError::Io { path, source }) => {
                return Ok(TransferOutcome::Failed(FailureKind::Io {
                    reason: format!("{}: {}", path.display(), source),
                }));
            }
            Err(FetchError::Fault(fault)) => return Err(fault),
        }
    }
}

/// Exponential backoff for the nth failed attempt, bounded by the cap.
fn backoff_delay(config: &SchedulerConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    config
        .backoff_base
        .saturating_mul(1u32 << exponent)
        .min(config.backoff_cap)
}
