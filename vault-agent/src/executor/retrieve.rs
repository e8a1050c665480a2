//! Archive retrieval.
//!
//! Retrieval is a store-side job: it is submitted, polled until the store
//! reports it complete, then its output is copied to a local file in
//! fixed-size blocks. Job ids are not persisted; an interrupted retrieval
//! starts over from a new job.
//!
//! End of output is decided by byte count whenever the store announces a
//! length, and by a zero-byte read otherwise. A read returning less than a
//! full block is never taken as end of data on its own, so outputs whose
//! size is an exact multiple of the block size are copied completely.

use super::manifest::{Manifest, ManifestEntry};
use crate::config::RetrievalConfig;
use crate::store::{ArchiveStore, JobStatus};
use crate::utils::errors::{ArchiveError, Result};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Progress of a single retrieval request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Requested,
    JobSubmitted,
    Polling,
    JobReady,
    Streaming,
    Done,
    Failed,
}

/// Summary of a finished retrieval
#[derive(Debug, Clone)]
pub struct RetrievalReport {
    pub job_id: String,
    pub destination: PathBuf,
    pub bytes_written: u64,
    pub blocks: usize,
    pub polls: u32,
    pub waited: Duration,
}

/// Drives retrieval jobs against one vault
pub struct RetrievalController<'a> {
    store: &'a dyn ArchiveStore,
    vault: String,
    config: RetrievalConfig,
}

/// Tracks the state machine of one request and logs every transition
struct Transitions<'p> {
    path: &'p str,
    state: RetrievalState,
}

impl<'p> Transitions<'p> {
    fn advance(&mut self, next: RetrievalState) {
        debug!("{}: {:?} -> {:?}", self.path, self.state, next);
        self.state = next;
    }
}

impl<'a> RetrievalController<'a> {
    pub fn new(store: &'a dyn ArchiveStore, vault: impl Into<String>, config: RetrievalConfig) -> Self {
        Self {
            store,
            vault: vault.into(),
            config,
        }
    }

    /// Retrieve the entry stored under `path` in `manifest`.
    pub async fn retrieve_path(
        &self,
        manifest: &Manifest,
        path: &str,
        destination: &Path,
    ) -> Result<RetrievalReport> {
        let entry = manifest
            .entry(path)
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_string()))?;
        self.retrieve(entry, destination).await
    }

    /// Retrieve an archived entry into `destination`, overwriting it.
    ///
    /// The destination is only created once the job output is available. A
    /// failure while streaming leaves the partially written file in place.
    pub async fn retrieve(&self, entry: &ManifestEntry, destination: &Path) -> Result<RetrievalReport> {
        let mut transitions = Transitions {
            path: &entry.path,
            state: RetrievalState::Requested,
        };

        match self.run(entry, destination, &mut transitions).await {
            Ok(report) => {
                transitions.advance(RetrievalState::Done);
                Ok(report)
            }
            Err(e) => {
                warn!(
                    "Retrieval of {} failed while {:?}: {}",
                    entry.path, transitions.state, e
                );
                transitions.advance(RetrievalState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        entry: &ManifestEntry,
        destination: &Path,
        transitions: &mut Transitions<'_>,
    ) -> Result<RetrievalReport> {
        let archive = entry
            .archive
            .as_ref()
            .ok_or_else(|| ArchiveError::NotArchived(entry.path.clone()))?;

        info!("{}: archive id {}", entry.path, archive.archive_id);

        let job_id = self
            .store
            .initiate_retrieval(&self.vault, &archive.archive_id, self.config.tier.as_str())
            .await
            .map_err(|source| ArchiveError::RetrievalInit {
                archive_id: archive.archive_id.clone(),
                source,
            })?;
        info!("Submitted {} retrieval job {}", self.config.tier.as_str(), job_id);
        transitions.advance(RetrievalState::JobSubmitted);

        transitions.advance(RetrievalState::Polling);
        let (status, polls, waited) = self.wait_for_job(&job_id).await?;
        info!("Job {} ready after {} check(s), {:?}", job_id, polls, waited);
        transitions.advance(RetrievalState::JobReady);

        let output = self.store.job_output(&self.vault, &job_id).await?;
        let expected = output.content_length.or(status.archive_size);

        transitions.advance(RetrievalState::Streaming);
        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = output.body;
        let copied = copy_blocks(&mut body, &mut file, self.config.block_size, expected).await;
        // Hand whatever was written to the OS, even when the copy failed
        file.flush().await?;
        let copied = copied?;

        info!(
            "Wrote {} bytes in {} block(s) to {}",
            copied.bytes,
            copied.blocks,
            destination.display()
        );

        if self.config.verify_content && copied.sha256 != entry.content_hash {
            return Err(ArchiveError::ChecksumMismatch {
                path: entry.path.clone(),
                expected: entry.content_hash.clone(),
                actual: copied.sha256,
            });
        }

        Ok(RetrievalReport {
            job_id,
            destination: destination.to_path_buf(),
            bytes_written: copied.bytes,
            blocks: copied.blocks,
            polls,
            waited,
        })
    }

    /// Poll until the store reports the job complete.
    ///
    /// The interval grows by `backoff_factor` up to `max_poll_interval`; when
    /// `max_wait` is set and elapses first the wait ends with `Timeout`.
    async fn wait_for_job(&self, job_id: &str) -> Result<(JobStatus, u32, Duration)> {
        let start = Instant::now();
        let max_wait = self.config.max_wait();
        let max_interval = self.config.max_poll_interval();
        let mut interval = self.config.poll_interval();
        let mut polls = 0u32;

        loop {
            let pause = match max_wait {
                Some(limit) => interval.min(limit.saturating_sub(start.elapsed())),
                None => interval,
            };
            tokio::time::sleep(pause).await;

            let status = self.store.job_status(&self.vault, job_id).await?;
            polls += 1;
            debug!("Checking job {} (check {}): completed={}", job_id, polls, status.completed);

            if let Some(reason) = status.failure {
                return Err(ArchiveError::RetrievalFailed {
                    job_id: job_id.to_string(),
                    reason,
                });
            }
            if status.completed {
                return Ok((status, polls, start.elapsed()));
            }

            let waited = start.elapsed();
            if max_wait.is_some_and(|limit| waited >= limit) {
                return Err(ArchiveError::Timeout {
                    job_id: job_id.to_string(),
                    waited,
                });
            }

            interval = next_interval(interval, self.config.backoff_factor, max_interval);
        }
    }
}

fn next_interval(current: Duration, factor: f64, max: Duration) -> Duration {
    let grown = current.as_secs_f64() * factor.max(1.0);
    if grown >= max.as_secs_f64() {
        return max;
    }
    Duration::try_from_secs_f64(grown).map_or(max, |next| next.min(max))
}

/// Destination for a retrieval: explicit path, configured path, or the
/// entry's file name in the current directory.
pub fn resolve_destination(entry_path: &str, explicit: Option<&Path>, configured: Option<&Path>) -> PathBuf {
    explicit
        .or(configured)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            Path::new(entry_path)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output.bin"))
        })
}

/// Outcome of a block copy
#[derive(Debug)]
pub struct CopiedBlocks {
    pub bytes: u64,
    pub blocks: usize,
    /// Hex SHA-256 of everything written
    pub sha256: String,
}

/// Copy `reader` to `writer` in blocks of at most `block_size` bytes.
///
/// With `expected` set, copying stops after exactly that many bytes and a
/// reader that ends earlier yields `TruncatedOutput`. Without it, copying
/// stops at the first zero-byte read.
pub async fn copy_blocks<R, W>(
    reader: &mut R,
    writer: &mut W,
    block_size: usize,
    expected: Option<u64>,
) -> Result<CopiedBlocks>
where
    R: AsyncRead + Unpin + ?Sized,
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    let block_size = block_size.max(1);
    let capacity = match expected {
        Some(total) => usize::try_from(total).unwrap_or(usize::MAX).min(block_size),
        None => block_size,
    };
    let mut buf = vec![0u8; capacity];
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut blocks = 0usize;

    loop {
        let want = match expected {
            Some(total) => usize::try_from(total - written).unwrap_or(usize::MAX).min(capacity),
            None => capacity,
        };
        if want == 0 {
            break;
        }

        let filled = fill_block(reader, &mut buf[..want]).await?;
        if filled > 0 {
            writer.write_all(&buf[..filled]).await?;
            hasher.update(&buf[..filled]);
            written += filled as u64;
            blocks += 1;
            debug!("Writing block: {}", filled);
        }

        if filled < want {
            if let Some(total) = expected {
                return Err(ArchiveError::TruncatedOutput {
                    expected: total,
                    received: written,
                });
            }
            break;
        }
    }

    Ok(CopiedBlocks {
        bytes: written,
        blocks,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
async fn fill_block<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalTier;
    use crate::executor::manifest::ArchiveReference;
    use crate::fs::hasher::sha256_bytes;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn fast_config(block_size: usize) -> RetrievalConfig {
        RetrievalConfig {
            tier: RetrievalTier::Expedited,
            poll_interval_secs: 0.001,
            max_poll_interval_secs: 0.01,
            block_size,
            ..RetrievalConfig::default()
        }
    }

    fn archived_entry(store: &MemoryStore, path: &str, content: &'static [u8]) -> ManifestEntry {
        store.insert_archive("vault", "arc-7", Bytes::from_static(content));
        let mut entry = ManifestEntry::new(path, sha256_bytes(content));
        entry.archive = Some(ArchiveReference {
            archive_id: "arc-7".to_string(),
            location: "/-/vaults/vault/archives/arc-7".to_string(),
            checksum: sha256_bytes(content),
            status_code: 201,
            uploaded_at: chrono::Utc::now(),
        });
        entry
    }

    #[tokio::test]
    async fn test_retrieve_after_polling() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").with_polls_until_ready(3).with_read_chunk(5);
        let entry = archived_entry(&store, "photos/cat.jpg", b"not really a jpeg");
        let dest = temp_dir.path().join("out.jpg");

        let controller = RetrievalController::new(&store, "vault", fast_config(4));
        let report = controller.retrieve(&entry, &dest).await?;

        assert_eq!(std::fs::read(&dest)?, b"not really a jpeg");
        assert_eq!(report.bytes_written, 17);
        assert_eq!(report.blocks, 5);
        assert_eq!(report.polls, 3);
        assert_eq!(store.status_calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_huge_backoff_is_capped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").with_polls_until_ready(3);
        let entry = archived_entry(&store, "cat.jpg", b"meow");
        let config = RetrievalConfig {
            backoff_factor: 1e300,
            ..fast_config(4)
        };

        let report = RetrievalController::new(&store, "vault", config)
            .retrieve(&entry, &temp_dir.path().join("cat.jpg"))
            .await?;
        assert_eq!(report.polls, 3);
        assert_eq!(report.bytes_written, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_multiple_of_block_size() -> Result<()> {
        let content: Vec<u8> = (0..64u8).collect();
        let block = 16;

        // With and without an announced length the full output is written
        for announce in [true, false] {
            let mut reader: &[u8] = &content;
            let mut out = Vec::new();
            let expected = announce.then_some(content.len() as u64);
            let copied = copy_blocks(&mut reader, &mut out, block, expected).await?;
            assert_eq!(out, content);
            assert_eq!(copied.blocks, 4);
            assert_eq!(copied.sha256, sha256_bytes(&content));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_short_reads_are_not_end_of_stream() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").without_content_length().with_read_chunk(3);
        let entry = archived_entry(&store, "x", b"0123456789abcdef");
        let dest = temp_dir.path().join("x");

        let report = RetrievalController::new(&store, "vault", fast_config(8))
            .retrieve(&entry, &dest)
            .await?;
        assert_eq!(std::fs::read(&dest)?, b"0123456789abcdef");
        assert_eq!(report.blocks, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_output() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").with_truncated_output(4);
        let entry = archived_entry(&store, "x", b"0123456789");
        let dest = temp_dir.path().join("x");

        let err = RetrievalController::new(&store, "vault", fast_config(4))
            .retrieve(&entry, &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::TruncatedOutput { expected: 10, received: 6 }));
        // Partial output stays on disk
        assert_eq!(std::fs::read(&dest)?, b"012345");
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_creates_no_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").with_polls_until_ready(u32::MAX);
        let entry = archived_entry(&store, "x", b"data");
        let dest = temp_dir.path().join("x");
        let config = RetrievalConfig {
            max_wait_secs: Some(0.02),
            ..fast_config(4)
        };

        let err = RetrievalController::new(&store, "vault", config)
            .retrieve(&entry, &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Timeout { .. }));
        assert!(!dest.exists());
        assert!(store.status_calls() >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_job() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault").with_failing_jobs("archive unavailable");
        let entry = archived_entry(&store, "x", b"data");

        let err = RetrievalController::new(&store, "vault", fast_config(4))
            .retrieve(&entry, &temp_dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::RetrievalFailed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_archive_is_init_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault");
        let mut entry = archived_entry(&store, "x", b"data");
        if let Some(archive) = entry.archive.as_mut() {
            archive.archive_id = "no-such-archive".to_string();
        }

        let err = RetrievalController::new(&store, "vault", fast_config(4))
            .retrieve(&entry, &temp_dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::RetrievalInit { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_unarchived_entry() {
        let store = MemoryStore::new("vault");
        let entry = ManifestEntry::new("never-uploaded", "00");

        let err = RetrievalController::new(&store, "vault", fast_config(4))
            .retrieve(&entry, Path::new("unused"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotArchived(_)));
        assert_eq!(store.initiate_calls(), 0);
    }

    #[tokio::test]
    async fn test_content_verification() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MemoryStore::new("vault");
        let mut entry = archived_entry(&store, "x", b"data");
        entry.content_hash = sha256_bytes(b"other data");

        let err = RetrievalController::new(&store, "vault", fast_config(4))
            .retrieve(&entry, &temp_dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));

        let config = RetrievalConfig {
            verify_content: false,
            ..fast_config(4)
        };
        RetrievalController::new(&store, "vault", config)
            .retrieve(&entry, &temp_dir.path().join("y"))
            .await?;
        Ok(())
    }

    #[test]
    fn test_next_interval() {
        let max = Duration::from_secs(10);
        assert_eq!(next_interval(Duration::from_secs(1), 1.0, max), Duration::from_secs(1));
        assert_eq!(next_interval(Duration::from_secs(4), 2.0, max), Duration::from_secs(8));
        assert_eq!(next_interval(Duration::from_secs(8), 2.0, max), max);
        assert_eq!(next_interval(Duration::from_secs(1), 1e300, max), max);
        assert_eq!(next_interval(Duration::from_secs(1), f64::INFINITY, max), max);
    }

    #[test]
    fn test_resolve_destination() {
        assert_eq!(
            resolve_destination("photos/2020/cat.jpg", None, None),
            PathBuf::from("cat.jpg")
        );
        assert_eq!(
            resolve_destination("photos/cat.jpg", None, Some(Path::new("output.jpg"))),
            PathBuf::from("output.jpg")
        );
        assert_eq!(
            resolve_destination("photos/cat.jpg", Some(Path::new("a.jpg")), Some(Path::new("b.jpg"))),
            PathBuf::from("a.jpg")
        );
    }
}
