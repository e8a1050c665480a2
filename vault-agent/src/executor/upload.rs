//! Archive upload: pushes every unreferenced manifest entry to the vault and
//! records the reference the store hands back.

use super::manifest::{ArchiveReference, Manifest};
use crate::config::{FlushPolicy, UploadConfig};
use crate::fs::hasher::tree_hash;
use crate::store::ArchiveStore;
use crate::utils::errors::{ArchiveError, Result};
use bytes::Bytes;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Upload run summary
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub uploaded_bytes: u64,
    /// Uploads whose store checksum differed from the local tree hash
    pub checksum_mismatches: usize,
}

struct UploadedEntry {
    bytes: u64,
    mismatch: Option<ArchiveError>,
}

/// Uploads pending manifest entries to one vault
pub struct ArchiveUploader<'a> {
    store: &'a dyn ArchiveStore,
    vault: String,
    config: UploadConfig,
    manifest_path: Option<PathBuf>,
}

impl<'a> ArchiveUploader<'a> {
    pub fn new(store: &'a dyn ArchiveStore, vault: impl Into<String>, config: UploadConfig) -> Self {
        Self {
            store,
            vault: vault.into(),
            config,
            manifest_path: None,
        }
    }

    /// Persist the manifest to `path` according to the flush policy
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Upload every entry lacking an archive reference, in path order.
    ///
    /// On return the manifest reflects exactly the uploads the store
    /// confirmed. The first failure aborts the run with
    /// [`ArchiveError::UploadAborted`]; with `EndOfBatch` nothing is written
    /// to disk in that case, with `PerEntry` every confirmed upload already is.
    /// A strict checksum mismatch aborts only after the reference is recorded.
    pub async fn upload(&self, manifest: &mut Manifest) -> Result<UploadReport> {
        let pending = manifest.pending();
        let mut report = UploadReport {
            skipped: manifest.len() - pending.len(),
            ..UploadReport::default()
        };

        info!(
            "Uploading {} of {} files to vault {} ({} already archived)",
            pending.len(),
            manifest.len(),
            self.vault,
            report.skipped
        );

        for path in pending {
            let uploaded = match self.upload_entry(manifest, &path).await {
                Ok(uploaded) => uploaded,
                Err(e) => return Err(self.abort(path, report.uploaded, e)),
            };
            report.uploaded += 1;
            report.uploaded_bytes += uploaded.bytes;

            if self.config.flush == FlushPolicy::PerEntry {
                self.flush(manifest)?;
            }

            // The reference is already attached: the store holds the archive either way
            if let Some(mismatch) = uploaded.mismatch {
                report.checksum_mismatches += 1;
                if self.config.verify_checksum {
                    return Err(self.abort(path, report.uploaded, mismatch));
                }
            }
        }

        // PerEntry already wrote after the last upload; only an empty run still needs it
        if self.config.flush == FlushPolicy::EndOfBatch || report.uploaded == 0 {
            self.flush(manifest)?;
        }

        info!(
            "Upload complete: {} uploaded ({} bytes), {} skipped",
            report.uploaded, report.uploaded_bytes, report.skipped
        );
        Ok(report)
    }

    fn abort(&self, path: String, confirmed: usize, e: ArchiveError) -> ArchiveError {
        warn!(
            "Upload of {} failed after {} confirmed upload(s): {}",
            path, confirmed, e
        );
        ArchiveError::UploadAborted {
            path,
            confirmed,
            source: Box::new(e),
        }
    }

    /// Upload one entry and attach its reference, whatever checksum the
    /// store reports.
    async fn upload_entry(&self, manifest: &mut Manifest, path: &str) -> Result<UploadedEntry> {
        let content_hash = manifest
            .entry(path)
            .map(|e| e.content_hash.clone())
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_string()))?;

        info!("Sending {}", path);
        let content = Bytes::from(tokio::fs::read(path).await?);
        let size = content.len() as u64;
        let local_tree_hash = tree_hash(&content);

        let receipt = self.store.upload_archive(&self.vault, content).await?;

        let mismatch = (receipt.checksum != local_tree_hash).then(|| {
            warn!(
                "Store checksum for {} differs from local tree hash ({} != {})",
                path, receipt.checksum, local_tree_hash
            );
            ArchiveError::ChecksumMismatch {
                path: path.to_string(),
                expected: local_tree_hash,
                actual: receipt.checksum.clone(),
            }
        });

        info!(
            "Archived {}: status {}, archive id {}, location {}",
            path, receipt.status_code, receipt.archive_id, receipt.location
        );
        info!("  checksum: {}", receipt.checksum);
        info!("  sha256:   {}", content_hash);

        manifest.attach_archive(path, ArchiveReference::from_receipt(receipt))?;
        Ok(UploadedEntry {
            bytes: size,
            mismatch,
        })
    }

    fn flush(&self, manifest: &Manifest) -> Result<()> {
        if let Some(manifest_path) = &self.manifest_path {
            debug!("Flushing manifest to {}", manifest_path.display());
            manifest.save(manifest_path)?;
        }
        Ok(())
    }
}
