//! Custom error types for the vault agent.

use crate::store::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Manifest {} is corrupt: {source}", .path.display())]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),

    #[error("Retrieval job for archive {archive_id} was rejected: {source}")]
    RetrievalInit {
        archive_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Retrieval job {job_id} failed: {reason}")]
    RetrievalFailed { job_id: String, reason: String },

    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    #[error("Entry not found in manifest: {0}")]
    EntryNotFound(String),

    #[error("Entry has not been archived yet: {0}")]
    NotArchived(String),

    #[error("Retrieval job {job_id} not ready after {waited:?}")]
    Timeout { job_id: String, waited: Duration },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Job output ended early: expected {expected} bytes, received {received}")]
    TruncatedOutput { expected: u64, received: u64 },

    #[error("Upload aborted at {path} after {confirmed} confirmed upload(s): {source}")]
    UploadAborted {
        path: String,
        confirmed: usize,
        #[source]
        source: Box<ArchiveError>,
    },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
