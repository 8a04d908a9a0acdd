//! Status command - reconcile a catalog against the cache and report.

use std::path::PathBuf;

use clap::Args;

use super::{build_manager, format_bytes, read_catalog};
use crate::error::CliError;

/// Arguments for the status command.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Path to the catalog document (JSON).
    pub catalog: PathBuf,

    /// Cache directory for manifests and downloads.
    #[arg(long, default_value = "downlink-cache")]
    pub cache_dir: PathBuf,

    /// Override the environment CDN root for empty/localhost URL bases.
    #[arg(long)]
    pub base_url: Option<String>,
}

/// Run the status command: reconcile without downloading or deleting
/// anything, then print one line per entry.
pub fn run(args: StatusArgs) -> Result<(), CliError> {
    let document = read_catalog(&args.catalog)?;

    // Automatic downloads off, and no update ticks: initialization only
    // reads and reconciles, so the cleanup sweep never deletes.
    let mut manager = build_manager(&args.cache_dir, args.base_url.as_deref(), 1, 100, false)?;
    manager
        .initialize(&document, &Default::default())
        .map_err(|e| CliError::Catalog(e.to_string()))?;

    println!("{:<32} {:<18} {:>20}", "ID", "STATE", "BYTES");
    for entry in manager.entries() {
        let bytes = format!(
            "{} / {}",
            format_bytes(entry.downloaded_bytes()),
            format_bytes(entry.total_bytes())
        );
        println!(
            "{:<32} {:<18} {:>20}",
            entry.id(),
            entry.state().as_str(),
            bytes
        );
    }

    let available = manager.entries().filter(|e| e.is_available()).count();
    let total = manager.entries().count();
    println!("\n{} of {} entries available", available, total);

    Ok(())
}
