//! Archive store abstraction.
//!
//! The agent talks to cold storage only through [`ArchiveStore`]. A vault
//! holds opaque archives; content comes back through asynchronous retrieval
//! jobs that must be polled until the store has staged the data.

pub mod glacier;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use glacier::GlacierStore;
pub use memory::MemoryStore;

/// Errors reported by a store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The vault, archive or job does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The store understood and refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request did not complete (network, credentials, throttling)
    #[error("transport: {0}")]
    Transport(String),
}

/// Aggregate vault metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInfo {
    pub name: String,
    pub arn: String,
    pub created_at: String,
    pub archive_count: u64,
    pub total_size_bytes: u64,
}

/// What the store hands back after accepting an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub archive_id: String,
    pub location: String,
    pub checksum: String,
    pub status_code: u16,
}

/// Snapshot of a retrieval job as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub completed: bool,

    /// Set when the store gave up on the job
    pub failure: Option<String>,

    /// Size of the archive being staged, when the store reports it
    pub archive_size: Option<u64>,
}

/// Byte stream of a completed retrieval job.
pub struct JobOutput {
    /// Total bytes the body will yield, when known
    pub content_length: Option<u64>,

    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for JobOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOutput")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Cold-storage operations consumed by the uploader, retrieval controller and inspector.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Describe a vault
    async fn describe_vault(&self, vault: &str) -> Result<VaultInfo, StoreError>;

    /// Store `content` as a new archive
    async fn upload_archive(&self, vault: &str, content: Bytes) -> Result<UploadReceipt, StoreError>;

    /// Start staging an archive for download; returns the job id
    async fn initiate_retrieval(
        &self,
        vault: &str,
        archive_id: &str,
        tier: &str,
    ) -> Result<String, StoreError>;

    /// Current state of a retrieval job
    async fn job_status(&self, vault: &str, job_id: &str) -> Result<JobStatus, StoreError>;

    /// Open the output of a completed job
    async fn job_output(&self, vault: &str, job_id: &str) -> Result<JobOutput, StoreError>;
}
