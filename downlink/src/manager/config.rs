//! Configuration for the download cache manager.

use std::time::Duration;

use crate::catalog::UrlResolver;
use crate::tracker::TrackerConfig;

/// Default cap on concurrent background downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;

/// Default wait after a failed download before the entry may be scheduled
/// again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default minimum interval between two disk-issue notifications of the
/// same kind.
pub const DEFAULT_DISK_ISSUE_WINDOW: Duration = Duration::from_secs(30);

/// Default orphan deletions per update tick.
pub const DEFAULT_CLEANER_BATCH_SIZE: usize = 8;

/// Top-level configuration passed to `Manager::new`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on concurrent background downloads.
    pub max_concurrent_downloads: usize,

    /// Wait between a failed download and the entry's next eligibility.
    pub retry_delay: Duration,

    /// Minimum interval between same-kind disk-issue notifications.
    pub disk_issue_window: Duration,

    /// Orphan deletions performed per update tick.
    pub cleaner_batch_size: usize,

    /// Put the expected CRC32 in the download URL as a query parameter, so
    /// a stale CDN cache can never serve bytes for an older version.
    pub use_crc_in_url: bool,

    /// Whether queued entries are handed to the downloader at all. When
    /// false the queue simply holds (no error is raised).
    pub automatic_downloads_enabled: bool,

    /// Retry budget configuration.
    pub tracker: TrackerConfig,

    /// Environment resolution for the catalog's URL base.
    pub url_resolver: UrlResolver,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            retry_delay: DEFAULT_RETRY_DELAY,
            disk_issue_window: DEFAULT_DISK_ISSUE_WINDOW,
            cleaner_batch_size: DEFAULT_CLEANER_BATCH_SIZE,
            use_crc_in_url: true,
            automatic_downloads_enabled: true,
            tracker: TrackerConfig::default(),
            url_resolver: UrlResolver::passthrough(),
        }
    }
}

impl ManagerConfig {
    /// Set the concurrent download cap (minimum 1).
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max.max(1);
        self
    }

    /// Set the post-failure retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the disk-issue notification window.
    pub fn with_disk_issue_window(mut self, window: Duration) -> Self {
        self.disk_issue_window = window;
        self
    }

    /// Set the per-tick cleaner batch size.
    pub fn with_cleaner_batch_size(mut self, batch_size: usize) -> Self {
        self.cleaner_batch_size = batch_size;
        self
    }

    /// Enable or disable the CRC query parameter in download URLs.
    pub fn with_crc_in_url(mut self, enabled: bool) -> Self {
        self.use_crc_in_url = enabled;
        self
    }

    /// Set whether downloads start automatically.
    pub fn with_automatic_downloads(mut self, enabled: bool) -> Self {
        self.automatic_downloads_enabled = enabled;
        self
    }

    /// Set the retry budget.
    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    /// Set the URL resolver.
    pub fn with_url_resolver(mut self, resolver: UrlResolver) -> Self {
        self.url_resolver = resolver;
        self
    }
}
