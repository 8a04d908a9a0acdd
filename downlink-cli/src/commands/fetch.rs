//! Fetch command - download everything a catalog declares.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use downlink::{policy, CatalogEntryStatus, EntryState, Manager, NetworkReachability};

use super::{build_manager, format_bytes, read_catalog};
use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Path to the catalog document (JSON).
    pub catalog: PathBuf,

    /// Cache directory for manifests and downloads.
    #[arg(long, default_value = "downlink-cache")]
    pub cache_dir: PathBuf,

    /// Override the environment CDN root for empty/localhost URL bases.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Grant mobile-data consent for a group (repeatable).
    #[arg(long = "grant-group")]
    pub grant_groups: Vec<String>,

    /// Treat the connection as metered mobile data instead of Wi-Fi.
    #[arg(long)]
    pub mobile_data: bool,

    /// Concurrent downloads.
    #[arg(long, default_value_t = 2)]
    pub parallel: usize,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 100)]
    pub timeout: u64,
}

/// Run the fetch command: tick the manager until every entry is either
/// available or parked, by a permanent error or by the connection policy.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let document = read_catalog(&args.catalog)?;
    let mut manager = build_manager(
        &args.cache_dir,
        args.base_url.as_deref(),
        args.parallel,
        args.timeout,
        true,
    )?;

    manager
        .initialize(&document, &Default::default())
        .map_err(|e| CliError::Catalog(e.to_string()))?;

    manager.set_reachability(if args.mobile_data {
        NetworkReachability::ViaMobileData
    } else {
        NetworkReachability::ViaWifi
    });
    for group in &args.grant_groups {
        manager.groups_set_is_permission_granted(group, true);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .map_err(|e| CliError::Setup(e.to_string()))?;
    }

    let handle = manager.create_all_handle();
    let total = handle.total_bytes(&manager);
    println!(
        "Fetching {} entries ({}) from {}",
        handle.ids().len(),
        format_bytes(total),
        manager.url_base()
    );

    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        if interrupted.load(Ordering::SeqCst) {
            bar.abandon();
            return Err(CliError::Interrupted);
        }

        manager.update();
        bar.set_position(handle.downloaded_bytes(&manager));

        // Entries the connection policy blocks will never be admitted in
        // this run (reachability and grants are fixed by the flags), so
        // count them as settled instead of spinning forever.
        let settled = manager.is_cleanup_done()
            && manager.entries().all(|entry| match entry.state() {
                EntryState::Available | EntryState::PermanentError => true,
                EntryState::InQueueForDownload => admission_blocked(&manager, entry).is_some(),
                _ => false,
            });
        if settled {
            break;
        }

        std::thread::sleep(Duration::from_millis(50));
    }
    bar.finish();

    for issue in manager.take_disk_issues() {
        debug!(?issue, "disk issue during fetch");
    }

    let failed: Vec<_> = manager
        .entries()
        .filter(|entry| !entry.is_available())
        .collect();

    if failed.is_empty() {
        println!("All content available in {}", args.cache_dir.display());
        Ok(())
    } else {
        for entry in &failed {
            let reason = entry
                .last_error()
                .cloned()
                .or_else(|| admission_blocked(&manager, entry))
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            eprintln!("  {}: {}", entry.id(), reason);
        }
        Err(CliError::Fetch(format!(
            "{} of {} entries unavailable",
            failed.len(),
            handle.ids().len()
        )))
    }
}

/// The policy error keeping `entry` out of the download queue, if any.
fn admission_blocked(manager: &Manager, entry: &CatalogEntryStatus) -> Option<downlink::Error> {
    let granted = entry
        .groups()
        .iter()
        .any(|gid| manager.groups_get_is_permission_granted(gid));
    policy::admission_error(manager.reachability(), granted)
}
