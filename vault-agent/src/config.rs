//! Configuration management for the vault agent.
//!
//! Loads configuration from a TOML file; every section falls back to defaults
//! so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vault: VaultConfig,
    pub manifest: ManifestConfig,
    pub scan: ScanConfig,
    pub upload: UploadConfig,
    pub retrieval: RetrievalConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault holding every uploaded archive
    pub name: String,

    /// AWS region override (defaults to the standard AWS environment)
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Manifest file location
    pub path: PathBuf,
}

/// What the scanner does when a single file cannot be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorPolicy {
    /// Abort the whole scan on the first error
    #[default]
    FailFast,
    /// Leave the file out of the manifest and report it
    SkipAndReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root directory used when a command needs a scan and none was given
    pub root: Option<PathBuf>,

    /// Follow symbolic links (walkdir detects cycles)
    pub follow_links: bool,

    pub on_error: ScanErrorPolicy,

    /// File-name substrings to leave out of the manifest
    pub exclude: Vec<String>,
}

/// When the uploader writes the manifest back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Save after every confirmed upload
    #[default]
    PerEntry,
    /// Save once, after the whole batch succeeded
    EndOfBatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub flush: FlushPolicy,

    /// Fail the upload when the store checksum differs from the local tree hash
    pub verify_checksum: bool,
}

/// Retrieval speed tier requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetrievalTier {
    #[default]
    Expedited,
    Standard,
    Bulk,
}

impl RetrievalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalTier::Expedited => "Expedited",
            RetrievalTier::Standard => "Standard",
            RetrievalTier::Bulk => "Bulk",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub tier: RetrievalTier,

    /// Delay before the first job status check (seconds, fractional allowed)
    pub poll_interval_secs: f64,

    /// Multiplier applied to the interval after each check (1.0 = fixed)
    pub backoff_factor: f64,

    /// Upper bound for the grown interval
    pub max_poll_interval_secs: f64,

    /// Give up waiting for the job after this long (None = wait forever)
    pub max_wait_secs: Option<f64>,

    /// Bytes copied from the job output per block (default: 128MB)
    pub block_size: usize,

    /// Destination file (defaults to the entry's file name)
    pub output: Option<PathBuf>,

    /// Compare the retrieved bytes with the manifest content hash
    pub verify_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "MediaBackup".to_string(),
            region: None,
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("manifest.json"),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: None,
            follow_links: false,
            on_error: ScanErrorPolicy::FailFast,
            exclude: Vec::new(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tier: RetrievalTier::Expedited,
            poll_interval_secs: 1.0,
            backoff_factor: 1.0,
            max_poll_interval_secs: 60.0,
            max_wait_secs: None,
            block_size: 128 * 1024 * 1024,
            output: None,
            verify_content: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RetrievalConfig {
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        seconds(self.max_poll_interval_secs.max(self.poll_interval_secs))
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(seconds)
    }
}

/// Saturates instead of panicking on values `validate` would reject
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_seconds(key: &str, secs: f64) -> crate::Result<()> {
    if secs < 0.0 {
        return Err(crate::ArchiveError::Config(format!("{key} must be a non-negative number")));
    }
    Duration::try_from_secs_f64(secs)
        .map(|_| ())
        .map_err(|e| crate::ArchiveError::Config(format!("{key} = {secs}: {e}")))
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.vault.name.is_empty() {
            return Err(crate::ArchiveError::Config("vault.name must not be empty".into()));
        }
        if self.retrieval.block_size == 0 {
            return Err(crate::ArchiveError::Config("retrieval.block_size must be positive".into()));
        }
        check_seconds("retrieval.poll_interval_secs", self.retrieval.poll_interval_secs)?;
        check_seconds("retrieval.max_poll_interval_secs", self.retrieval.max_poll_interval_secs)?;
        if let Some(max_wait) = self.retrieval.max_wait_secs {
            check_seconds("retrieval.max_wait_secs", max_wait)?;
        }
        if !self.retrieval.backoff_factor.is_finite() || self.retrieval.backoff_factor < 1.0 {
            return Err(crate::ArchiveError::Config("retrieval.backoff_factor must be >= 1.0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.vault.name, "MediaBackup");
        assert_eq!(config.retrieval.block_size, 128 * 1024 * 1024);
        assert_eq!(config.retrieval.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.retrieval.tier, RetrievalTier::Expedited);
        assert_eq!(config.upload.flush, FlushPolicy::PerEntry);
        assert_eq!(config.scan.on_error, ScanErrorPolicy::FailFast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [vault]
            name = "Photos"

            [scan]
            on_error = "skip_and_report"

            [upload]
            flush = "end_of_batch"

            [retrieval]
            tier = "Bulk"
            max_wait_secs = 3600.0
            "#,
        )
        .unwrap();

        assert_eq!(config.vault.name, "Photos");
        assert_eq!(config.scan.on_error, ScanErrorPolicy::SkipAndReport);
        assert_eq!(config.upload.flush, FlushPolicy::EndOfBatch);
        assert_eq!(config.retrieval.tier, RetrievalTier::Bulk);
        assert_eq!(config.retrieval.max_wait(), Some(Duration::from_secs(3600)));
        assert_eq!(config.manifest.path, PathBuf::from("manifest.json"));
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut config = Config::default();
        config.retrieval.block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        let mut config = Config::default();
        config.retrieval.poll_interval_secs = 1e20;
        assert!(matches!(config.validate(), Err(crate::ArchiveError::Config(_))));
        assert_eq!(config.retrieval.poll_interval(), Duration::MAX);

        let mut config = Config::default();
        config.retrieval.max_wait_secs = Some(1e20);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.max_poll_interval_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.max_wait_secs = Some(-1.0);
        assert!(config.validate().is_err());
    }
}
