//! Command-line interface.
//!
//! ## Commands
//!
//! - `ledgermerge process` - Handle an upload notification against local directories
//! - `ledgermerge ingest` - Decode and reconcile one local batch file
//! - `ledgermerge show` - Print a joined record

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};

use ledgermerge_core::observability::LogFormat;
use ledgermerge_core::record::RecordKind;
use ledgermerge_core::{DirectoryStore, MergeKey};
use ledgermerge_engine::Reconciler;

use crate::blob::LocalBlobStore;
use crate::config::IngestConfig;
use crate::dispatcher::Dispatcher;
use crate::notification::{Notification, kind_for_key};

/// ledgermerge - reconcile out-of-order back-office batches.
#[derive(Debug, Parser)]
#[command(name = "ledgermerge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log output format (json or pretty).
    #[arg(long, global = true, env = "LEDGERMERGE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Per-operation store timeout in milliseconds.
    #[arg(long, global = true, env = "LEDGERMERGE_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: Option<u64>,

    /// Attempts per key before a lost race is an error.
    #[arg(long, global = true, env = "LEDGERMERGE_CAS_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Separator between a batch file's kind prefix and the rest of its name.
    #[arg(long, global = true, env = "LEDGERMERGE_KIND_SEPARATOR")]
    pub kind_separator: Option<char>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Effective configuration: environment first, flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable or flag value is invalid.
    pub fn config(&self) -> Result<IngestConfig> {
        let mut config = IngestConfig::from_env()?;
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(ms) = self.store_timeout_ms {
            config.store_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts.max(1);
        }
        if let Some(separator) = self.kind_separator {
            config.kind_separator = separator;
        }
        config.validate()?;
        Ok(config)
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Handle an upload notification.
    Process(ProcessArgs),
    /// Decode and reconcile one local batch file.
    Ingest(IngestArgs),
    /// Print the joined record stored under a key.
    Show(ShowArgs),
}

/// Arguments for `process`.
#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Directory holding one sub-directory per container.
    #[arg(long)]
    pub blob_root: PathBuf,
    /// Directory of the joined-record store.
    #[arg(long)]
    pub store_dir: PathBuf,
    /// Notification JSON file.
    pub notification: PathBuf,
}

/// Arguments for `ingest`.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Directory of the joined-record store.
    #[arg(long)]
    pub store_dir: PathBuf,
    /// Batch kind; inferred from the file name when omitted.
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<RecordKind>,
    /// CSV batch file.
    pub file: PathBuf,
}

/// Arguments for `show`.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Directory of the joined-record store.
    #[arg(long)]
    pub store_dir: PathBuf,
    /// Subject reference or account number.
    pub key: String,
}

/// Accepts a kind label (`account`) or a file prefix (`accounts`).
fn parse_kind(value: &str) -> std::result::Result<RecordKind, String> {
    let value = value.trim().to_ascii_lowercase();
    RecordKind::ALL
        .into_iter()
        .find(|k| k.as_str() == value || k.file_prefix() == value)
        .ok_or_else(|| {
            let known: Vec<_> = RecordKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown kind '{value}' (expected one of {})", known.join(", "))
        })
}

/// Runs a parsed command.
///
/// # Errors
///
/// Returns any configuration, I/O, decode or reconciliation error.
pub async fn execute(cli: Cli, config: &IngestConfig) -> Result<()> {
    match cli.command {
        Commands::Process(args) => process(args, config).await,
        Commands::Ingest(args) => ingest(args, config).await,
        Commands::Show(args) => show(args).await,
    }
}

async fn process(args: ProcessArgs, config: &IngestConfig) -> Result<()> {
    let payload = tokio::fs::read(&args.notification)
        .await
        .with_context(|| format!("reading {}", args.notification.display()))?;
    let notification = Notification::parse(&payload)?;

    let store = Arc::new(DirectoryStore::open(&args.store_dir).await?);
    let blobs = Arc::new(LocalBlobStore::new(args.blob_root));
    let dispatcher = Dispatcher::from_config(store, blobs, config);

    let summary = dispatcher.handle(&notification).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn ingest(args: IngestArgs, config: &IngestConfig) -> Result<()> {
    let file_name = file_name(&args.file)?;
    let kind = match args.kind {
        Some(kind) => kind,
        None => kind_for_key(&file_name, config.kind_separator)?,
    };
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;

    let store = Arc::new(DirectoryStore::open(&args.store_dir).await?);
    let parent = args.file.parent().unwrap_or_else(|| Path::new("."));
    let blobs = Arc::new(LocalBlobStore::new(parent));
    let dispatcher = Dispatcher::from_config(store, blobs, config);

    let outcome = dispatcher
        .ingest_bytes("local", &file_name, kind, &Bytes::from(data))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn show(args: ShowArgs) -> Result<()> {
    let store = Arc::new(DirectoryStore::open(&args.store_dir).await?);
    let reconciler = Reconciler::new(store);
    let key = MergeKey::new(args.key);
    let record = reconciler
        .lookup(&key)
        .await?
        .with_context(|| format!("no joined record under key '{key}'"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
