//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level`; an unparsable level falls back to `info`.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}

/// Resolve the effective log level from an explicit level and the verbosity flag.
///
/// Verbose runs log one line per file, which the scanner and uploader emit at `debug`.
pub fn effective_level(explicit: Option<&str>, configured: &str, verbose: u8) -> String {
    match (explicit, verbose) {
        (Some(level), _) => level.to_string(),
        (None, 0) => configured.to_string(),
        (None, 1) => "debug".to_string(),
        (None, _) => "trace".to_string(),
    }
}
