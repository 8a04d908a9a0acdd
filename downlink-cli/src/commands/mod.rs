//! CLI command implementations.

pub mod fetch;
pub mod status;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use downlink::{
    HttpNetworkDriver, Manager, ManagerConfig, StdDiskDriver, UrlResolver,
};

use crate::error::CliError;

/// Format a byte count for terminal output.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Read a catalog document from disk.
pub fn read_catalog(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::Catalog(format!("{}: {}", path.display(), e)))
}

/// Build a manager over the production drivers.
pub fn build_manager(
    cache_dir: &Path,
    base_url: Option<&str>,
    parallel: usize,
    timeout_secs: u64,
    automatic_downloads: bool,
) -> Result<Manager, CliError> {
    let mut config = ManagerConfig::default()
        .with_max_concurrent_downloads(parallel)
        .with_automatic_downloads(automatic_downloads);
    if let Some(base) = base_url {
        config = config.with_url_resolver(UrlResolver::for_environment(base));
    }

    let network = HttpNetworkDriver::with_timeout(Duration::from_secs(timeout_secs))
        .map_err(|e| CliError::Setup(e.to_string()))?;

    Ok(Manager::new(
        config,
        Arc::new(StdDiskDriver::new()),
        Arc::new(network),
        cache_dir,
    ))
}
