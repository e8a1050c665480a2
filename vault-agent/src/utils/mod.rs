//! Utility modules for the vault agent.

pub mod errors;
pub mod logger;

pub use errors::{ArchiveError, Result};
