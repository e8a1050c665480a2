//! Manifest types and persistence.
//!
//! A manifest maps every scanned file path to its content hash and, once the
//! file has been uploaded, to the archive reference the store assigned. It is
//! serialized as pretty JSON and always loaded/saved as a whole.

use crate::store::UploadReceipt;
use crate::utils::errors::{ArchiveError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Current on-disk format version
pub const MANIFEST_VERSION: u32 = 1;

/// Manifest of a scanned tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,

    /// Root the entries were scanned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    pub created_at: DateTime<Utc>,

    files: HashMap<String, ManifestEntry>,
}

/// A single file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,

    /// Hex SHA-256 of the content at scan time
    pub content_hash: String,

    /// Present only once the store confirmed an upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveReference>,
}

/// Store-assigned identifiers confirming a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReference {
    pub archive_id: String,
    pub location: String,
    /// Checksum computed by the store (tree hash), independent of `content_hash`
    pub checksum: String,
    pub status_code: u16,
    pub uploaded_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            archive: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archive.is_some()
    }
}

impl ArchiveReference {
    pub fn from_receipt(receipt: UploadReceipt) -> Self {
        Self {
            archive_id: receipt.archive_id,
            location: receipt.location,
            checksum: receipt.checksum,
            status_code: receipt.status_code,
            uploaded_at: Utc::now(),
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Manifest {
    /// Create an empty manifest
    pub fn new(root: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            root,
            created_at: Utc::now(),
            files: HashMap::new(),
        }
    }

    /// Load a manifest previously written by [`Manifest::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::ManifestNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest =
            serde_json::from_slice(&content).map_err(|source| ArchiveError::ManifestCorrupt {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some((key, entry)) = manifest.files.iter().find(|(key, entry)| **key != entry.path) {
            return Err(ArchiveError::ManifestCorrupt {
                path: path.to_path_buf(),
                source: serde::de::Error::custom(format!(
                    "entry keyed {key} records path {}",
                    entry.path
                )),
            });
        }

        if manifest.version > MANIFEST_VERSION {
            return Err(ArchiveError::Config(format!(
                "{} uses manifest version {}, newer than supported version {}",
                path.display(),
                manifest.version,
                MANIFEST_VERSION
            )));
        }

        info!("Loaded manifest {}: {} files", path.display(), manifest.len());
        Ok(manifest)
    }

    /// Serialize the whole manifest and overwrite `path` in place.
    ///
    /// This is a single write, not write-then-rename: a crash mid-write can
    /// leave a truncated file behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| ArchiveError::ManifestCorrupt {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json)?;
        debug!("Wrote manifest {} ({} files)", path.display(), self.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of entries carrying an archive reference
    pub fn archived_count(&self) -> usize {
        self.files.values().filter(|e| e.is_archived()).count()
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.get(path)
    }

    /// Insert (or replace) the entry keyed by its path
    pub fn insert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.files.insert(entry.path.clone(), entry)
    }

    /// Record the archive reference of a confirmed upload.
    pub fn attach_archive(&mut self, path: &str, reference: ArchiveReference) -> Result<()> {
        let entry = self
            .files
            .get_mut(path)
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_string()))?;
        entry.archive = Some(reference);
        Ok(())
    }

    /// Sorted paths of entries that were never uploaded
    pub fn pending(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .values()
            .filter(|e| !e.is_archived())
            .map(|e| e.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// All entries in path order
    pub fn sorted_entries(&self) -> Vec<&ManifestEntry> {
        let mut entries: Vec<&ManifestEntry> = self.files.values().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Root directory recorded at scan time
    pub fn root_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(PathBuf::from)
    }
}
