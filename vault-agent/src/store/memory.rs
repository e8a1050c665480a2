//! In-memory archive store.
//!
//! Keeps archives in a map and simulates retrieval jobs that become ready
//! after a configurable number of status checks. Archive ids are assigned
//! sequentially (`arc-1`, `arc-2`, ...) so runs are reproducible. Fault
//! injection and call counters make it the store double for tests.

use super::{ArchiveStore, JobOutput, JobStatus, StoreError, UploadReceipt, VaultInfo};
use crate::fs::hasher::tree_hash;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

struct MemoryVault {
    arn: String,
    created_at: String,
    archives: HashMap<String, Bytes>,
}

struct MemoryJob {
    vault: String,
    archive_id: String,
    polls_remaining: u32,
}

#[derive(Default)]
struct Behaviour {
    polls_until_ready: u32,
    omit_content_length: bool,
    read_chunk: Option<usize>,
    truncate_output_by: u64,
    fail_upload_call: Option<usize>,
    fail_jobs: Option<String>,
    checksum_override: Option<String>,
}

#[derive(Default)]
struct State {
    vaults: HashMap<String, MemoryVault>,
    jobs: HashMap<String, MemoryJob>,
    next_archive: u64,
}

/// Archive store held entirely in memory.
pub struct MemoryStore {
    state: Mutex<State>,
    behaviour: Behaviour,
    upload_calls: AtomicUsize,
    initiate_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MemoryStore {
    /// Create a store with a single empty vault
    pub fn new(vault: &str) -> Self {
        let store = Self {
            state: Mutex::new(State::default()),
            behaviour: Behaviour::default(),
            upload_calls: AtomicUsize::new(0),
            initiate_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        };
        store.add_vault(vault);
        store
    }

    pub fn add_vault(&self, vault: &str) {
        let mut state = self.lock();
        state.vaults.entry(vault.to_string()).or_insert_with(|| MemoryVault {
            arn: format!("arn:aws:glacier:local:000000000000:vaults/{}", vault),
            created_at: Utc::now().to_rfc3339(),
            archives: HashMap::new(),
        });
    }

    /// Jobs report completion on the n-th status check (0 = immediately)
    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.behaviour.polls_until_ready = polls;
        self
    }

    /// Job output does not announce its length
    pub fn without_content_length(mut self) -> Self {
        self.behaviour.omit_content_length = true;
        self
    }

    /// Job output yields at most `chunk` bytes per read
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.behaviour.read_chunk = Some(chunk.max(1));
        self
    }

    /// Job output ends `bytes` early while still announcing the full length
    pub fn with_truncated_output(mut self, bytes: u64) -> Self {
        self.behaviour.truncate_output_by = bytes;
        self
    }

    /// The n-th upload call (1-based) fails with a transport error
    pub fn failing_upload_call(mut self, call: usize) -> Self {
        self.behaviour.fail_upload_call = Some(call);
        self
    }

    /// Every retrieval job ends in failure with `reason`
    pub fn with_failing_jobs(mut self, reason: &str) -> Self {
        self.behaviour.fail_jobs = Some(reason.to_string());
        self
    }

    /// Report `checksum` for every upload instead of the tree hash
    pub fn with_checksum_override(mut self, checksum: &str) -> Self {
        self.behaviour.checksum_override = Some(checksum.to_string());
        self
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::Relaxed)
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::Relaxed)
    }

    /// Content of a stored archive
    pub fn archive(&self, vault: &str, archive_id: &str) -> Option<Bytes> {
        let state = self.lock();
        state.vaults.get(vault)?.archives.get(archive_id).cloned()
    }

    /// Store an archive directly under a chosen id
    pub fn insert_archive(&self, vault: &str, archive_id: &str, content: Bytes) {
        self.add_vault(vault);
        let mut state = self.lock();
        if let Some(v) = state.vaults.get_mut(vault) {
            v.archives.insert(archive_id.to_string(), content);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn describe_vault(&self, vault: &str) -> Result<VaultInfo, StoreError> {
        let state = self.lock();
        let v = state
            .vaults
            .get(vault)
            .ok_or_else(|| StoreError::NotFound(format!("vault {}", vault)))?;

        Ok(VaultInfo {
            name: vault.to_string(),
            arn: v.arn.clone(),
            created_at: v.created_at.clone(),
            archive_count: v.archives.len() as u64,
            total_size_bytes: v.archives.values().map(|a| a.len() as u64).sum(),
        })
    }

    async fn upload_archive(&self, vault: &str, content: Bytes) -> Result<UploadReceipt, StoreError> {
        let call = self.upload_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.behaviour.fail_upload_call == Some(call) {
            return Err(StoreError::Transport(format!("connection reset on upload call {}", call)));
        }

        let mut state = self.lock();
        state.next_archive += 1;
        let archive_id = format!("arc-{}", state.next_archive);
        let v = state
            .vaults
            .get_mut(vault)
            .ok_or_else(|| StoreError::NotFound(format!("vault {}", vault)))?;

        let checksum = self
            .behaviour
            .checksum_override
            .clone()
            .unwrap_or_else(|| tree_hash(&content));
        v.archives.insert(archive_id.clone(), content);

        Ok(UploadReceipt {
            location: format!("/-/vaults/{}/archives/{}", vault, archive_id),
            archive_id,
            checksum,
            status_code: 201,
        })
    }

    async fn initiate_retrieval(
        &self,
        vault: &str,
        archive_id: &str,
        _tier: &str,
    ) -> Result<String, StoreError> {
        self.initiate_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        let v = state
            .vaults
            .get(vault)
            .ok_or_else(|| StoreError::NotFound(format!("vault {}", vault)))?;
        if !v.archives.contains_key(archive_id) {
            return Err(StoreError::Rejected(format!("unknown archive id {}", archive_id)));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        state.jobs.insert(
            job_id.clone(),
            MemoryJob {
                vault: vault.to_string(),
                archive_id: archive_id.to_string(),
                polls_remaining: self.behaviour.polls_until_ready,
            },
        );
        Ok(job_id)
    }

    async fn job_status(&self, vault: &str, job_id: &str) -> Result<JobStatus, StoreError> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(job_id)
            .filter(|job| job.vault == vault)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;

        job.polls_remaining = job.polls_remaining.saturating_sub(1);
        let ready = job.polls_remaining == 0;
        let archive_id = job.archive_id.clone();
        let archive_size = state
            .vaults
            .get(vault)
            .and_then(|v| v.archives.get(&archive_id))
            .map(|a| a.len() as u64);

        Ok(JobStatus {
            completed: ready,
            failure: if ready { self.behaviour.fail_jobs.clone() } else { None },
            archive_size: if self.behaviour.omit_content_length { None } else { archive_size },
        })
    }

    async fn job_output(&self, vault: &str, job_id: &str) -> Result<JobOutput, StoreError> {
        let state = self.lock();
        let job = state
            .jobs
            .get(job_id)
            .filter(|job| job.vault == vault)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        if job.polls_remaining > 0 {
            return Err(StoreError::Rejected(format!("job {} is still in progress", job_id)));
        }

        let content = state
            .vaults
            .get(vault)
            .and_then(|v| v.archives.get(&job.archive_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("archive {}", job.archive_id)))?;

        let full_length = content.len() as u64;
        let keep = content.len().saturating_sub(self.behaviour.truncate_output_by as usize);
        let body = TrickleReader {
            data: content.slice(..keep),
            pos: 0,
            chunk: self.behaviour.read_chunk.unwrap_or(usize::MAX),
        };

        Ok(JobOutput {
            content_length: if self.behaviour.omit_content_length { None } else { Some(full_length) },
            body: Box::pin(body),
        })
    }
}

/// Reader handing out at most `chunk` bytes per read.
struct TrickleReader {
    data: Bytes,
    pos: usize,
    chunk: usize,
}

impl AsyncRead for TrickleReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(self.chunk).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}
