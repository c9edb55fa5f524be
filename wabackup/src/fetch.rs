//! Chunk fetcher: one entry's ranged, append-only download.
//!
//! The fetcher owns the only blocking operations in the pipeline (the
//! network reads). It opens the target file, seeks to the recorded
//! offset via an append-only handle, issues a `Range: bytes=<offset>-`
//! request, and reports progress to the resume ledger after every chunk
//! write so that progress stays durably observable across
//! interruptions.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ledger::{LedgerFault, ResumeLedger};
use crate::manifest::{BackupEntry, DEFAULT_API_BASE};
use crate::session::Session;

/// Default connect timeout for the transfer client.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Fetcher configuration.
#[derive(Clone, Debug)]
pub struct FetcherConfig {
    /// API base the media endpoints live under.
    pub base_url: String,
    /// Per-attempt timeout for each network operation.
    pub attempt_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

/// Result of one successful fetch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchSummary {
    /// Bytes moved over the network by this attempt. Zero means the
    /// local file already held the declared size.
    pub bytes_fetched: u64,
}

/// Errors raised by a fetch attempt.
#[derive(Debug)]
pub enum FetchError {
    /// Network-layer failure (timeout, reset, 5xx). Retryable.
    Transient { reason: String },

    /// The server rejected the entry (4xx other than range-related).
    /// Permanent for this entry; the run continues with the rest.
    Rejected { status: u16, reason: String },

    /// The stream ended before the declared size was reached. Retryable;
    /// the next attempt resumes from the flushed offset.
    Incomplete { received: u64, declared: u64 },

    /// The run was cancelled; flushed progress stays on disk.
    Cancelled,

    /// Local disk failure. Not retryable.
    Io { path: PathBuf, source: io::Error },

    /// Ledger integrity fault. Fatal for the whole run.
    Fault(LedgerFault),
}

impl FetchError {
    /// Whether the scheduler may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Incomplete { .. })
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient { reason } => write!(f, "transient failure: {}", reason),
            Self::Rejected { status, reason } => {
                write!(f, "rejected with status {}: {}", status, reason)
            }
            Self::Incomplete { received, declared } => write!(
                f,
                "stream ended at {} of {} declared bytes",
                received, declared
            ),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Self::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<LedgerFault> for FetchError {
    fn from(fault: LedgerFault) -> Self {
        Self::Fault(fault)
    }
}

/// Downloads one entry at a time, resuming from the ledger's recorded
/// offset.
#[derive(Debug)]
pub struct ChunkFetcher {
    http: reqwest::Client,
    config: FetcherConfig,
    session: Session,
}

impl ChunkFetcher {
    /// Create a fetcher for the given session.
    pub fn new(session: Session, config: FetcherConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            config,
            session,
        }
    }

    /// Download the remainder of one entry into its target file.
    ///
    /// Holds the ledger's exclusive writer access for the duration.
    /// Returns once the on-disk byte count equals the declared size, or
    /// with the failure classification from the error taxonomy.
    pub async fn fetch(
        &self,
        entry: &BackupEntry,
        ledger: &ResumeLedger,
        cancel: &CancellationToken,
    ) -> Result<FetchSummary, FetchError> {
        let state = ledger.state(&entry.path, entry.size)?;
        let _writer = ledger.acquire_writer(&entry.path)?;
        let mut offset = state.bytes_on_disk;

        let absolute = ledger.absolute(&entry.path);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Io {
                    path: entry.path.clone(),
                    source: e,
                })?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&absolute)
            .await
            .map_err(|e| FetchError::Io {
                path: entry.path.clone(),
                source: e,
            })?;

        if offset == entry.size {
            // Nothing to move; the verifier has the last word.
            ledger.mark_complete_unverified(&entry.path)?;
            return Ok(FetchSummary { bytes_fetched: 0 });
        }

        debug!(
            path = %entry.path.display(),
            offset,
            declared = entry.size,
            "Fetching entry"
        );

        let url = format!(
            "{}/{}?alt=media",
            self.config.base_url,
            entry.escaped_name()
        );
        let mut request = self.http.get(&url).bearer_auth(self.session.bearer());
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::time::timeout(self.config.attempt_timeout, request.send())
            .await
            .map_err(|_| FetchError::Transient {
                reason: format!(
                    "no response within {}s",
                    self.config.attempt_timeout.as_secs()
                ),
            })?
            .map_err(|e| FetchError::Transient {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            // The server disagrees about our offset; the next attempt
            // re-queries the ledger and recovers.
            return Err(FetchError::Transient {
                reason: "range not satisfiable".to_string(),
            });
        }
        if status.is_client_error() {
            return Err(FetchError::Rejected {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("client error")
                    .to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Transient {
                reason: format!("server answered {}", status),
            });
        }
        if offset > 0 && status != reqwest::StatusCode::PARTIAL_CONTENT {
            // Server ignored the range request; start over from zero.
            warn!(
                path = %entry.path.display(),
                "Server ignored range request, restarting from byte 0"
            );
            file.set_len(0).await.map_err(|e| FetchError::Io {
                path: entry.path.clone(),
                source: e,
            })?;
            ledger.reset(&entry.path)?;
            offset = 0;
        }

        let mut stream = response.bytes_stream();
        let mut written = offset;
        let mut fetched = 0u64;

        loop {
            if cancel.is_cancelled() {
                // The current chunk is already flushed; resumable later.
                file.flush().await.ok();
                return Err(FetchError::Cancelled);
            }

            let next = tokio::time::timeout(self.config.attempt_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Transient {
                    reason: format!(
                        "no data within {}s",
                        self.config.attempt_timeout.as_secs()
                    ),
                })?;
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(FetchError::Transient {
                        reason: e.to_string(),
                    })
                }
            };

            let new_total = written + chunk.len() as u64;
            if new_total > entry.size {
                // More bytes than declared is tampering or a bug, never
                // something to truncate away quietly.
                return Err(FetchError::Fault(LedgerFault::Oversize {
                    path: entry.path.clone(),
                    declared: entry.size,
                    actual: new_total,
                }));
            }

            file.write_all(&chunk).await.map_err(|e| FetchError::Io {
                path: entry.path.clone(),
                source: e,
            })?;
            written = new_total;
            fetched += chunk.len() as u64;
            ledger.record_progress(&entry.path, written)?;
        }

        file.flush().await.map_err(|e| FetchError::Io {
            path: entry.path.clone(),
            source: e,
        })?;

        if written < entry.size {
            return Err(FetchError::Incomplete {
                received: written,
                declared: entry.size,
            });
        }

        ledger.mark_complete_unverified(&entry.path)?;
        debug!(path = %entry.path.display(), fetched, "Fetch complete");
        Ok(FetchSummary {
            bytes_fetched: fetched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FileStatus;
    use crate::manifest::EntryKind;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_entry(size: u64) -> BackupEntry {
        BackupEntry {
            remote_name: "clients/wa/backups/1/files/Media/photo.jpg".to_string(),
            path: PathBuf::from("1/files/Media/photo.jpg"),
            size,
            md5_hex: "00".repeat(16),
            kind: EntryKind::Media,
        }
    }

    fn fetcher_for(server: &MockServer) -> ChunkFetcher {
        ChunkFetcher::new(
            Session::with_token("test-token"),
            FetcherConfig {
                base_url: server.uri(),
                attempt_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_full_download() {
        let server = MockServer::start().await;
        let body = vec![0x42u8; 1000];
        Mock::given(method("GET"))
            .and(path("/clients/wa/backups/1/files/Media/photo.jpg"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(1000);
        let cancel = CancellationToken::new();

        let summary = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.bytes_fetched, 1000);
        assert_eq!(std::fs::read(ledger.absolute(&entry.path)).unwrap(), body);
        let state = ledger.state(&entry.path, entry.size).unwrap();
        assert_eq!(state.status, FileStatus::CompleteUnverified);
        assert_eq!(state.bytes_on_disk, 1000);
    }

    #[tokio::test]
    async fn test_fetch_resumes_with_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients/wa/backups/1/files/Media/photo.jpg"))
            .and(header("range", "bytes=400-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0x42u8; 600]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let entry = test_entry(1000);
        let absolute = dir.path().join(&entry.path);
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        std::fs::write(&absolute, vec![0x42u8; 400]).unwrap();

        let ledger = ResumeLedger::new(dir.path());
        let cancel = CancellationToken::new();

        let summary = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.bytes_fetched, 600);
        assert_eq!(std::fs::metadata(&absolute).unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn test_fetch_complete_file_makes_no_request() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and fail the fetch.

        let dir = TempDir::new().unwrap();
        let entry = test_entry(1000);
        let absolute = dir.path().join(&entry.path);
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        std::fs::write(&absolute, vec![0x42u8; 1000]).unwrap();

        let ledger = ResumeLedger::new(dir.path());
        let cancel = CancellationToken::new();

        let summary = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.bytes_fetched, 0);
        assert_eq!(
            ledger.state(&entry.path, entry.size).unwrap().status,
            FileStatus::CompleteUnverified
        );
    }

    #[tokio::test]
    async fn test_fetch_4xx_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(1000);
        let cancel = CancellationToken::new();

        let err = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Rejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(1000);
        let cancel = CancellationToken::new();

        let err = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transient { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_short_stream_is_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x42u8; 700]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(1000);
        let cancel = CancellationToken::new();

        let err = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Incomplete {
                received: 700,
                declared: 1000
            }
        ));
        assert!(err.is_retryable());

        // The partial bytes stay flushed and resumable.
        let state = ledger.state(&entry.path, entry.size).unwrap();
        assert_eq!(state.bytes_on_disk, 700);
    }

    #[tokio::test]
    async fn test_fetch_oversize_body_is_a_fault() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x42u8; 1200]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(1000);
        let cancel = CancellationToken::new();

        let err = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Fault(LedgerFault::Oversize { declared: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_already_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x42u8; 100]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let entry = test_entry(100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher_for(&server)
            .fetch(&entry, &ledger, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
    }
}
