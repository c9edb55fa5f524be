//! Resume ledger: per-path download and verification bookkeeping.
//!
//! The ledger is the single authority on "how far along is this file".
//! State is computed lazily from the filesystem at first query and
//! cached for the run. Progress updates are strictly monotonic; a
//! regression means an external modification or a fetcher bug and is a
//! fatal integrity fault, never silently ignored.
//!
//! Locking is per logical path (dashmap shards plus one mutex per
//! entry), so cross-path access stays fully parallel. Write access is
//! additionally guarded by an exclusive [`WriterGuard`]; the active
//! writer count per path never exceeds one.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Verification status of a local file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    /// No local bytes yet.
    Absent,
    /// Some bytes on disk, fewer than declared.
    Partial,
    /// On-disk size equals the declared size; checksum not yet checked.
    CompleteUnverified,
    /// Checksum matched the manifest. The terminal state.
    CompleteVerified,
}

/// Snapshot of a path's local state.
#[derive(Clone, Debug)]
pub struct LocalFileState {
    /// Logical path, relative to the backup root.
    pub path: PathBuf,
    /// Bytes currently recorded on disk.
    pub bytes_on_disk: u64,
    /// Verification status.
    pub status: FileStatus,
}

/// Fatal integrity faults detected by the ledger.
///
/// Every variant indicates a logic bug or external tampering, not a
/// network condition; the run aborts when one surfaces.
#[derive(Debug)]
pub enum LedgerFault {
    /// A progress update would decrease the recorded byte count.
    Regression {
        path: PathBuf,
        recorded: u64,
        attempted: u64,
    },

    /// The on-disk byte count exceeds the declared size.
    Oversize {
        path: PathBuf,
        declared: u64,
        actual: u64,
    },

    /// Two writers tried to hold the same path at once.
    WriterConflict { path: PathBuf },

    /// A path was touched before its state was ever queried.
    Untracked { path: PathBuf },

    /// The local filesystem could not be inspected.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for LedgerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regression {
                path,
                recorded,
                attempted,
            } => write!(
                f,
                "progress regression for {}: {} recorded, {} attempted",
                path.display(),
                recorded,
                attempted
            ),
            Self::Oversize {
                path,
                declared,
                actual,
            } => write!(
                f,
                "{} holds {} bytes, more than the declared {}",
                path.display(),
                actual,
                declared
            ),
            Self::WriterConflict { path } => {
                write!(f, "concurrent writers for {}", path.display())
            }
            Self::Untracked { path } => {
                write!(f, "{} was never queried from the ledger", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "failed to inspect {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LedgerFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

struct PathEntry {
    declared: u64,
    state: Mutex<LocalFileState>,
    writers: AtomicUsize,
}

/// Per-run resume bookkeeping over a backup root directory.
pub struct ResumeLedger {
    root: PathBuf,
    entries: DashMap<PathBuf, Arc<PathEntry>>,
}

impl ResumeLedger {
    /// Create a ledger over the given backup root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: DashMap::new(),
        }
    }

    /// The backup root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute on-disk location for a logical path.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    /// Current state for a path, computed from the filesystem on first
    /// query and cached for the run.
    pub fn state(&self, path: &Path, declared: u64) -> Result<LocalFileState, LedgerFault> {
        let entry = self.entry(path, declared)?;
        let state = entry.state.lock().clone();
        Ok(state)
    }

    /// Record that a path now has `new_bytes` bytes on disk.
    ///
    /// Monotonic: rejects any update below the recorded count. An
    /// update above the declared size is an oversize fault.
    pub fn record_progress(&self, path: &Path, new_bytes: u64) -> Result<(), LedgerFault> {
        let entry = self.tracked(path)?;
        let mut state = entry.state.lock();

        if new_bytes < state.bytes_on_disk {
            return Err(LedgerFault::Regression {
                path: path.to_path_buf(),
                recorded: state.bytes_on_disk,
                attempted: new_bytes,
            });
        }
        if new_bytes > entry.declared {
            return Err(LedgerFault::Oversize {
                path: path.to_path_buf(),
                declared: entry.declared,
                actual: new_bytes,
            });
        }

        state.bytes_on_disk = new_bytes;
        if state.status == FileStatus::Absent && new_bytes > 0 {
            state.status = FileStatus::Partial;
        }
        Ok(())
    }

    /// Transition a path whose on-disk size reached the declared size
    /// to `CompleteUnverified`.
    pub fn mark_complete_unverified(&self, path: &Path) -> Result<(), LedgerFault> {
        let entry = self.tracked(path)?;
        let mut state = entry.state.lock();
        state.status = FileStatus::CompleteUnverified;
        Ok(())
    }

    /// Record the verifier's verdict for a path.
    ///
    /// A pass transitions to `CompleteVerified`. A failure resets the
    /// recorded bytes to zero and the status to `Partial`: a corrupted
    /// tail cannot be range-resumed once checksums disagree, so the
    /// local copy is discarded entirely rather than partially repaired.
    pub fn mark_verified(&self, path: &Path, verified: bool) -> Result<(), LedgerFault> {
        if verified {
            let entry = self.tracked(path)?;
            entry.state.lock().status = FileStatus::CompleteVerified;
            Ok(())
        } else {
            debug!(path = %path.display(), "Verification failed, discarding local bytes");
            self.reset(path)
        }
    }

    /// Discard all recorded progress for a path; the next transfer
    /// starts from byte zero. The explicit escape from monotonicity.
    pub fn reset(&self, path: &Path) -> Result<(), LedgerFault> {
        let entry = self.tracked(path)?;
        let mut state = entry.state.lock();
        state.status = FileStatus::Partial;
        state.bytes_on_disk = 0;
        Ok(())
    }

    /// Acquire exclusive write access to a path.
    ///
    /// The scheduler never dispatches the same path twice concurrently,
    /// so a conflict here is a fatal fault, not a wait condition.
    pub fn acquire_writer(&self, path: &Path) -> Result<WriterGuard, LedgerFault> {
        let entry = self.tracked(path)?;
        if entry
            .writers
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LedgerFault::WriterConflict {
                path: path.to_path_buf(),
            });
        }
        Ok(WriterGuard { entry })
    }

    /// Number of writers currently holding a path (0 or 1).
    pub fn active_writers(&self, path: &Path) -> usize {
        self.entries
            .get(path)
            .map(|e| e.writers.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn entry(&self, path: &Path, declared: u64) -> Result<Arc<PathEntry>, LedgerFault> {
        if let Some(entry) = self.entries.get(path) {
            return Ok(Arc::clone(&entry));
        }

        let absolute = self.absolute(path);
        let bytes_on_disk = match std::fs::metadata(&absolute) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(LedgerFault::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if bytes_on_disk > declared {
            return Err(LedgerFault::Oversize {
                path: path.to_path_buf(),
                declared,
                actual: bytes_on_disk,
            });
        }

        let status = if bytes_on_disk == 0 {
            FileStatus::Absent
        } else if bytes_on_disk < declared {
            FileStatus::Partial
        } else {
            FileStatus::CompleteUnverified
        };

        let entry = Arc::new(PathEntry {
            declared,
            state: Mutex::new(LocalFileState {
                path: path.to_path_buf(),
                bytes_on_disk,
                status,
            }),
            writers: AtomicUsize::new(0),
        });
        self.entries.insert(path.to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    fn tracked(&self, path: &Path) -> Result<Arc<PathEntry>, LedgerFault> {
        self.entries
            .get(path)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| LedgerFault::Untracked {
                path: path.to_path_buf(),
            })
    }
}

impl fmt::Debug for ResumeLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeLedger")
            .field("root", &self.root)
            .field("tracked_paths", &self.entries.len())
            .finish()
    }
}

/// Exclusive write access to one logical path.
///
/// Released on drop; never held past the owning transfer's completion
/// or failure.
pub struct WriterGuard {
    entry: Arc<PathEntry>,
}

impl fmt::Debug for WriterGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterGuard")
            .field("path", &self.entry.state.lock().path)
            .finish()
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.entry.writers.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn ledger_with_file(contents: &[u8]) -> (TempDir, ResumeLedger, PathBuf) {
        let dir = TempDir::new().unwrap();
        let rel = PathBuf::from("1/files/Databases/msgstore.db");
        let absolute = dir.path().join(&rel);
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(&absolute).unwrap();
        file.write_all(contents).unwrap();
        let ledger = ResumeLedger::new(dir.path());
        (dir, ledger, rel)
    }

    #[test]
    fn test_state_absent() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let state = ledger.state(Path::new("missing.bin"), 100).unwrap();
        assert_eq!(state.bytes_on_disk, 0);
        assert_eq!(state.status, FileStatus::Absent);
    }

    #[test]
    fn test_state_partial_and_complete() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 40]);
        let state = ledger.state(&rel, 100).unwrap();
        assert_eq!(state.bytes_on_disk, 40);
        assert_eq!(state.status, FileStatus::Partial);

        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 100]);
        let state = ledger.state(&rel, 100).unwrap();
        assert_eq!(state.status, FileStatus::CompleteUnverified);
    }

    #[test]
    fn test_state_oversize_is_fatal() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 150]);
        let err = ledger.state(&rel, 100).unwrap_err();
        assert!(matches!(err, LedgerFault::Oversize { declared: 100, actual: 150, .. }));
    }

    #[test]
    fn test_state_is_cached_for_the_run() {
        let (dir, ledger, rel) = ledger_with_file(&[0u8; 40]);
        ledger.state(&rel, 100).unwrap();

        // External growth after first query is not re-read.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(&rel))
            .unwrap();
        file.write_all(&[0u8; 20]).unwrap();

        let state = ledger.state(&rel, 100).unwrap();
        assert_eq!(state.bytes_on_disk, 40);
    }

    #[test]
    fn test_record_progress_monotonic() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 40]);
        ledger.state(&rel, 100).unwrap();

        ledger.record_progress(&rel, 60).unwrap();
        ledger.record_progress(&rel, 60).unwrap(); // equal is fine

        let err = ledger.record_progress(&rel, 50).unwrap_err();
        assert!(matches!(
            err,
            LedgerFault::Regression { recorded: 60, attempted: 50, .. }
        ));
    }

    #[test]
    fn test_record_progress_oversize() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 40]);
        ledger.state(&rel, 100).unwrap();

        let err = ledger.record_progress(&rel, 101).unwrap_err();
        assert!(matches!(err, LedgerFault::Oversize { .. }));
    }

    #[test]
    fn test_untracked_path_is_a_fault() {
        let dir = TempDir::new().unwrap();
        let ledger = ResumeLedger::new(dir.path());
        let err = ledger.record_progress(Path::new("never-queried"), 1).unwrap_err();
        assert!(matches!(err, LedgerFault::Untracked { .. }));
    }

    #[test]
    fn test_mark_verified_transitions() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 100]);
        ledger.state(&rel, 100).unwrap();

        ledger.mark_verified(&rel, true).unwrap();
        let state = ledger.state(&rel, 100).unwrap();
        assert_eq!(state.status, FileStatus::CompleteVerified);

        ledger.mark_verified(&rel, false).unwrap();
        let state = ledger.state(&rel, 100).unwrap();
        assert_eq!(state.status, FileStatus::Partial);
        assert_eq!(state.bytes_on_disk, 0);

        // After the reset, progress restarts from zero.
        ledger.record_progress(&rel, 10).unwrap();
    }

    #[test]
    fn test_writer_guard_is_exclusive() {
        let (_dir, ledger, rel) = ledger_with_file(&[0u8; 10]);
        ledger.state(&rel, 10).unwrap();

        assert_eq!(ledger.active_writers(&rel), 0);
        let guard = ledger.acquire_writer(&rel).unwrap();
        assert_eq!(ledger.active_writers(&rel), 1);

        let err = ledger.acquire_writer(&rel).unwrap_err();
        assert!(matches!(err, LedgerFault::WriterConflict { .. }));

        drop(guard);
        assert_eq!(ledger.active_writers(&rel), 0);
        ledger.acquire_writer(&rel).unwrap();
    }
}
