//! Vault Agent Library
//!
//! Tracks a directory tree in a manifest of content hashes, uploads files to a
//! cold-storage vault and retrieves archived content back to disk.

pub mod config;
pub mod executor;
pub mod fs;
pub mod inspect;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{Manifest, ManifestEntry};
pub use store::ArchiveStore;
pub use utils::errors::{ArchiveError, Result};
