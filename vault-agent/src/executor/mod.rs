//! Manifest lifecycle: scan a tree into a manifest, upload what is not yet
//! archived, retrieve archived entries back to disk.
//!
//! Every step runs to completion before the next starts; the manifest is
//! exclusively borrowed by whichever step mutates it.

pub mod manifest;
pub mod retrieve;
pub mod scan;
pub mod upload;

pub use manifest::{ArchiveReference, Manifest, ManifestEntry};
pub use retrieve::{RetrievalController, RetrievalReport, RetrievalState};
pub use scan::{scan, ScanOptions, ScanOutcome};
pub use upload::{ArchiveUploader, UploadReport};
