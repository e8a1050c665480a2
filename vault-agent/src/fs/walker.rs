//! Directory traversal for manifest creation.
//!
//! Yields every regular file below a root. Directories are traversed but not
//! reported; symlinks are skipped unless `follow_links` is set, in which case
//! walkdir's loop detection reports cycles as errors.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// File-name substrings to exclude
    pub exclude_patterns: Vec<String>,
}

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file (root joined with the relative path)
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// File depth from root
    pub depth: usize,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            depth: entry.depth(),
        })
    }

    /// Manifest key for this file
    pub fn manifest_key(&self) -> io::Result<String> {
        normalize_path(&self.path)
    }
}

/// Walk a directory tree, yielding each regular file or the error met on the way.
///
/// Entries are visited in file-name order so repeated scans are deterministic.
pub fn walk_files<'a>(
    root: &'a Path,
    options: &WalkOptions,
) -> impl Iterator<Item = io::Result<FileInfo>> + 'a {
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let patterns = options.exclude_patterns.clone();

    walker
        .into_iter()
        .filter_entry(move |entry| entry.depth() == 0 || !should_exclude(entry, &patterns))
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(FileInfo::from_entry(&entry, root)),
            // Directories, unfollowed symlinks, sockets, fifos, devices
            Ok(_) => None,
            Err(e) => Some(Err(io::Error::from(e))),
        })
}

/// Render a path as a forward-slash separated manifest key.
pub fn normalize_path(path: &Path) -> io::Result<String> {
    let text = path.to_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("path is not valid UTF-8: {}", path.display()),
        )
    })?;

    if cfg!(windows) {
        Ok(text.replace('\\', "/"))
    } else {
        Ok(text.to_string())
    }
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}
