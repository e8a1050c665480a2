//! Tree scanning: one manifest entry per regular file, each fingerprinted by
//! its content hash.

use super::manifest::{Manifest, ManifestEntry};
use crate::config::{ScanConfig, ScanErrorPolicy};
use crate::fs::hasher::sha256_file;
use crate::fs::walker::{normalize_path, walk_files, WalkOptions};
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scanner settings
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub walk: WalkOptions,
    pub on_error: ScanErrorPolicy,
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            walk: WalkOptions {
                follow_links: config.follow_links,
                max_depth: None,
                exclude_patterns: config.exclude.clone(),
            },
            on_error: config.on_error,
        }
    }
}

/// A file left out of the manifest under [`ScanErrorPolicy::SkipAndReport`]
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Offending path, when the walker could name it
    pub path: Option<PathBuf>,
    pub error: String,
}

/// Result of a scan
#[derive(Debug)]
pub struct ScanOutcome {
    pub manifest: Manifest,
    pub skipped: Vec<SkippedFile>,
    pub total_bytes: u64,
}

/// Walk `root` and build a fresh manifest.
///
/// Every entry starts without an archive reference. An empty tree yields an
/// empty manifest. Under `FailFast` the first walk or hashing error aborts
/// the scan and no manifest is produced.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ScanOutcome> {
    info!("Scanning {}", root.display());

    let mut manifest = Manifest::new(Some(normalize_path(root)?));
    let mut skipped = Vec::new();
    let mut total_bytes = 0u64;

    for item in walk_files(root, &options.walk) {
        let hashed = item.and_then(|file| {
            let key = file.manifest_key()?;
            let hash = sha256_file(&file.path).map_err(|e| annotate(&file.path, e))?;
            Ok((file, key, hash))
        });

        match hashed {
            Ok((file, key, hash)) => {
                debug!("{} {}", hash, key);
                total_bytes += file.size;
                manifest.insert(ManifestEntry::new(key, hash));
            }
            Err(e) if options.on_error == ScanErrorPolicy::SkipAndReport => {
                warn!("Skipping unreadable entry: {}", e);
                skipped.push(SkippedFile {
                    path: error_path(&e),
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Scanned {}: {} files, {} bytes, {} skipped",
        root.display(),
        manifest.len(),
        total_bytes,
        skipped.len()
    );

    Ok(ScanOutcome {
        manifest,
        skipped,
        total_bytes,
    })
}

/// Wrap an I/O error with the path that caused it
fn annotate(path: &Path, e: std::io::Error) -> std::io::Error {
    std::io::Error::new(e.kind(), PathError { path: path.to_path_buf(), source: e })
}

fn error_path(e: &std::io::Error) -> Option<PathBuf> {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<PathError>())
        .map(|pe| pe.path.clone())
}

#[derive(Debug, thiserror::Error)]
#[error("{}: {source}", .path.display())]
struct PathError {
    path: PathBuf,
    source: std::io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ArchiveError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_empty_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let outcome = scan(temp_dir.path(), &ScanOptions::default())?;
        assert!(outcome.manifest.is_empty());
        assert!(outcome.skipped.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_completeness() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("x/y"))?;
        fs::create_dir(temp_dir.path().join("empty"))?;
        for (i, rel) in ["one", "two", "x/three", "x/y/four", "x/y/five"].iter().enumerate() {
            fs::write(temp_dir.path().join(rel), vec![i as u8; i * 100])?;
        }

        let outcome = scan(temp_dir.path(), &ScanOptions::default())?;
        let manifest = outcome.manifest;
        assert_eq!(manifest.len(), 5);
        assert_eq!(manifest.archived_count(), 0);
        assert_eq!(outcome.total_bytes, 1000);
        assert!(manifest.sorted_entries().iter().all(|e| e.archive.is_none()));
        Ok(())
    }

    #[test]
    fn test_identical_files_get_separate_entries() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("copy1"), b"same")?;
        fs::write(temp_dir.path().join("copy2"), b"same")?;

        let manifest = scan(temp_dir.path(), &ScanOptions::default())?.manifest;
        let entries = manifest.sorted_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content_hash, entries[1].content_hash);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_file_policies() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("ok.txt"), b"fine")?;
        let locked = temp_dir.path().join("locked.txt");
        fs::write(&locked, b"secret")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        // Running as root ignores permission bits; nothing to test then
        if fs::File::open(&locked).is_ok() {
            return Ok(());
        }

        let err = scan(temp_dir.path(), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));

        let options = ScanOptions {
            on_error: ScanErrorPolicy::SkipAndReport,
            ..ScanOptions::default()
        };
        let outcome = scan(temp_dir.path(), &options)?;
        assert_eq!(outcome.manifest.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].path.as_deref(), Some(locked.as_path()));
        Ok(())
    }
}
