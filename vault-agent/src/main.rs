//! Vault Agent - Main entry point
//!
//! Manifest-driven uploads to and retrievals from a cold-storage vault.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vault_agent::config::{Config, FlushPolicy, ScanErrorPolicy};
use vault_agent::executor::retrieve::resolve_destination;
use vault_agent::executor::{scan, ArchiveUploader, Manifest, RetrievalController, ScanOptions};
use vault_agent::store::GlacierStore;
use vault_agent::{inspect, utils, ArchiveError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Manifest file (overrides config)
    #[arg(short, long, value_name = "FILE", global = true)]
    manifest: Option<PathBuf>,

    /// Log one line per file; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a directory tree into a new manifest (replaces an existing one)
    Create {
        /// Root directory to scan
        #[arg(short, long)]
        path: PathBuf,

        /// Leave unreadable files out instead of aborting
        #[arg(long)]
        skip_unreadable: bool,
    },

    /// Upload every manifest entry that has not been archived yet
    Upload {
        /// Root to scan first when the manifest does not exist yet
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Print the manifest
    Dump,

    /// Print vault information
    Info,

    /// Retrieve one archived file by its manifest path
    Retrieve {
        /// Path of the entry as recorded in the manifest
        path: String,

        /// Destination file (overwritten)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level =
        utils::logger::effective_level(args.log_level.as_deref(), &config.log.level, args.verbose);
    utils::logger::init(&log_level)?;

    info!(
        "Starting vault-agent v{} (vault: {})",
        env!("CARGO_PKG_VERSION"),
        config.vault.name
    );

    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.manifest.path.clone());

    match args.command {
        Command::Create {
            path,
            skip_unreadable,
        } => create(&config, &path, skip_unreadable, &manifest_path).await,
        Command::Upload { path } => upload(&config, path, &manifest_path).await,
        Command::Dump => dump(&manifest_path, args.verbose > 0),
        Command::Info => vault_info(&config).await,
        Command::Retrieve { path, output } => {
            retrieve(&config, &path, output.as_deref(), &manifest_path).await
        }
    }
}

async fn create(config: &Config, root: &Path, skip_unreadable: bool, manifest_path: &Path) -> Result<()> {
    let manifest = scan_tree(config, root, skip_unreadable).await?;

    if manifest_path.is_file() {
        info!("Replacing existing manifest {}", manifest_path.display());
    }
    manifest.save(manifest_path)?;
    info!("Wrote {} ({} files)", manifest_path.display(), manifest.len());
    Ok(())
}

async fn upload(config: &Config, root: Option<PathBuf>, manifest_path: &Path) -> Result<()> {
    let mut manifest = match Manifest::load(manifest_path) {
        Ok(manifest) => manifest,
        Err(ArchiveError::ManifestNotFound(_)) => {
            let Some(root) = root.or_else(|| config.scan.root.clone()) else {
                bail!(
                    "No manifest at {} and no root to scan (pass --path or set scan.root)",
                    manifest_path.display()
                );
            };
            info!("No manifest at {}, scanning {} first", manifest_path.display(), root.display());
            let manifest = scan_tree(config, &root, false).await?;
            manifest.save(manifest_path)?;
            manifest
        }
        Err(e) => return Err(e.into()),
    };

    let store = GlacierStore::from_env(config.vault.region.clone()).await;
    let uploader = ArchiveUploader::new(&store, config.vault.name.clone(), config.upload.clone())
        .persist_to(manifest_path);

    let saved = match config.upload.flush {
        FlushPolicy::PerEntry => "confirmed uploads were saved to",
        FlushPolicy::EndOfBatch => "nothing was saved to",
    };
    let report = uploader
        .upload(&mut manifest)
        .await
        .with_context(|| format!("upload stopped; {} {}", saved, manifest_path.display()))?;

    if report.checksum_mismatches > 0 {
        warn!(
            "{} upload(s) reported a store checksum different from the local tree hash",
            report.checksum_mismatches
        );
    }
    println!(
        "Uploaded {} file(s), {} bytes; {} already archived",
        report.uploaded, report.uploaded_bytes, report.skipped
    );
    Ok(())
}

fn dump(manifest_path: &Path, verbose: bool) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;

    println!("Number of files: {}", manifest.len());
    println!("Archived:        {}", manifest.archived_count());
    for entry in manifest.sorted_entries() {
        match &entry.archive {
            Some(archive) if verbose => {
                println!("{}  {}", entry.content_hash, entry.path);
                println!("    Archive ID: {}", archive.archive_id);
                println!("    Location:   {}", archive.location);
                println!("    Checksum:   {}", archive.checksum);
                println!("    Status:     {}", archive.status_code);
                println!("    Uploaded:   {}", archive.uploaded_at.to_rfc3339());
            }
            Some(_) => println!("{}  {}", entry.content_hash, entry.path),
            None => println!("{}  {}  (not archived)", entry.content_hash, entry.path),
        }
    }
    Ok(())
}

async fn vault_info(config: &Config) -> Result<()> {
    let store = GlacierStore::from_env(config.vault.region.clone()).await;
    let info = inspect::describe_vault(&store, &config.vault.name).await?;

    println!("Vault information:");
    println!("Name      : {}", info.name);
    println!("ARN       : {}", info.arn);
    println!("Created   : {}", info.created_at);
    println!("# Archives: {}", info.archive_count);
    println!("Size (b)  : {}", info.total_size_bytes);
    Ok(())
}

async fn retrieve(config: &Config, path: &str, output: Option<&Path>, manifest_path: &Path) -> Result<()> {
    info!("Retrieving {}", path);
    let manifest = Manifest::load(manifest_path)?;
    let entry = manifest
        .entry(path)
        .ok_or_else(|| ArchiveError::EntryNotFound(path.to_string()))?;

    let destination = resolve_destination(path, output, config.retrieval.output.as_deref());
    let store = GlacierStore::from_env(config.vault.region.clone()).await;
    let controller =
        RetrievalController::new(&store, config.vault.name.clone(), config.retrieval.clone());

    let report = controller.retrieve(entry, &destination).await?;
    println!(
        "Retrieved {} -> {} ({} bytes, job {})",
        path,
        report.destination.display(),
        report.bytes_written,
        report.job_id
    );
    Ok(())
}

/// Scan on a blocking thread; walking and hashing are synchronous.
async fn scan_tree(config: &Config, root: &Path, skip_unreadable: bool) -> Result<Manifest> {
    let mut options = ScanOptions::from(&config.scan);
    if skip_unreadable {
        options.on_error = ScanErrorPolicy::SkipAndReport;
    }

    let root_owned = root.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || scan(&root_owned, &options)).await??;

    for skipped in &outcome.skipped {
        warn!("Not in manifest: {}", skipped.error);
    }
    Ok(outcome.manifest)
}
