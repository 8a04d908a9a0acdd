//! Orchestration of the whole download cache.
//!
//! The [`Manager`] owns every piece of mutable state: the entry table, the
//! permission groups, the download queue, the disk layer, the tracker and
//! the cleaner. The embedding application constructs one instance, calls
//! [`Manager::initialize`] with a catalog document, then calls
//! [`Manager::update`] periodically. Everything advances on that tick;
//! the only background threads are the download workers, whose completions
//! are drained back onto the tick before any shared state is touched.
//!
//! ```text
//! initialize(catalog, groups)          update(), every tick
//!   ├─ load + resolve catalog            ├─ drain disk issues
//!   ├─ build entry per id                ├─ drain download outcomes
//!   ├─ reconcile against disk            ├─ tick entry state machines
//!   └─ start orphan cleanup              ├─ tick cleaner
//!                                        └─ admit queued entries
//!                                           (permission / network gated,
//!                                            bounded concurrency)
//! ```
//!
//! Callers observe progress through [`Handle`]s created by
//! [`Manager::create_handle`] and friends.

mod config;
mod handle;

pub use config::{
    ManagerConfig, DEFAULT_CLEANER_BATCH_SIZE, DEFAULT_DISK_ISSUE_WINDOW,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_RETRY_DELAY,
};
pub use handle::Handle;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::cleaner::Cleaner;
use crate::disk::{Disk, DiskDriver, DiskIssue, StdDiskDriver};
use crate::downloader::{DownloadJob, Downloader, HttpNetworkDriver, NetworkDriver};
use crate::entry::{CatalogEntryStatus, EntryState};
use crate::error::{Error, Result};
use crate::policy::{self, NetworkReachability};
use crate::tracker::{AttemptRecord, Tracker};

/// Directory under the cache root holding manifest records.
pub const MANIFESTS_DIR_NAME: &str = "metadata";

/// Directory under the cache root holding downloaded blobs.
pub const DOWNLOADS_DIR_NAME: &str = "downloads";

/// Generations are seeded per catalog load in the high bits so an outcome
/// from a worker started under an older catalog can never match an entry
/// built from a newer one.
const GENERATION_EPOCH_STRIDE: u64 = 1 << 32;

/// A data-usage consent bucket. Ids may belong to several groups; an id
/// may download over mobile data once any covering group has consent.
#[derive(Debug, Clone)]
pub struct Group {
    id: String,
    members: BTreeSet<String>,
    permission_requested: bool,
    permission_granted: bool,
}

impl Group {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn permission_requested(&self) -> bool {
        self.permission_requested
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted
    }
}

/// The download cache: reconciles a catalog against disk, downloads what
/// is missing, verifies it and serves availability to callers.
pub struct Manager {
    config: ManagerConfig,
    disk: Disk,
    downloader: Downloader,
    tracker: Tracker,
    cleaner: Cleaner,
    url_base: String,
    entries: BTreeMap<String, CatalogEntryStatus>,
    groups: BTreeMap<String, Group>,
    queue: VecDeque<String>,
    reachability: NetworkReachability,
    automatic_enabled: bool,
    recent_disk_issues: Vec<DiskIssue>,
    generation_epoch: u64,
    initialized: bool,
}

impl Manager {
    /// Create a manager over explicit drivers. `cache_root` gains the
    /// `metadata` and `downloads` directories on first write.
    pub fn new(
        config: ManagerConfig,
        disk_driver: Arc<dyn DiskDriver>,
        network_driver: Arc<dyn NetworkDriver>,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        let cache_root = cache_root.into();
        let manifests_root = cache_root.join(MANIFESTS_DIR_NAME);
        let downloads_root = cache_root.join(DOWNLOADS_DIR_NAME);

        let disk = Disk::new(
            Arc::clone(&disk_driver),
            manifests_root,
            downloads_root.clone(),
            config.disk_issue_window,
        );
        let downloader = Downloader::new(network_driver, disk_driver, downloads_root);
        let tracker = Tracker::new(config.tracker.clone());
        let cleaner = Cleaner::new(config.cleaner_batch_size);
        let automatic_enabled = config.automatic_downloads_enabled;

        Self {
            config,
            disk,
            downloader,
            tracker,
            cleaner,
            url_base: String::new(),
            entries: BTreeMap::new(),
            groups: BTreeMap::new(),
            queue: VecDeque::new(),
            reachability: NetworkReachability::default(),
            automatic_enabled,
            recent_disk_issues: Vec::new(),
            generation_epoch: 0,
            initialized: false,
        }
    }

    /// Create a manager with the production filesystem and HTTP drivers.
    pub fn with_default_drivers(
        config: ManagerConfig,
        cache_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let network = HttpNetworkDriver::new()?;
        Ok(Self::new(
            config,
            Arc::new(StdDiskDriver::new()),
            Arc::new(network),
            cache_root,
        ))
    }

    /// Load a catalog document and reconcile every declared id against the
    /// local cache, then start cleaning up ids the catalog dropped.
    ///
    /// `group_members` supplements the group memberships declared inline in
    /// the catalog (group id to member ids). Consent is runtime state: a
    /// re-initialize resets it and the embedder re-applies any persisted
    /// decisions through the permission setters.
    ///
    /// Idempotent with respect to disk: initializing twice over the same
    /// catalog and disk state yields the same entry table without mutating
    /// any file.
    pub fn initialize(
        &mut self,
        document: &str,
        group_members: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<()> {
        let catalog = Catalog::load(document, &self.config.url_resolver)?;

        self.generation_epoch += GENERATION_EPOCH_STRIDE;
        self.url_base = catalog.url_base().to_string();
        self.entries.clear();
        self.groups.clear();
        self.queue.clear();
        self.recent_disk_issues.clear();
        self.tracker = Tracker::new(self.config.tracker.clone());

        for (id, catalog_entry) in catalog.entries() {
            let mut status = CatalogEntryStatus::new(id.clone(), catalog_entry);
            status.seed_generation(self.generation_epoch);
            self.entries.insert(id.clone(), status);
        }

        // Inline group declarations plus the supplied supplement.
        let mut memberships = catalog.inline_groups();
        for (gid, members) in group_members {
            memberships
                .entry(gid.clone())
                .or_default()
                .extend(members.iter().cloned());
        }

        for (gid, members) in memberships {
            let mut known = BTreeSet::new();
            for member in members {
                match self.entries.get_mut(&member) {
                    Some(entry) => {
                        entry.add_group(gid.clone());
                        known.insert(member);
                    }
                    None => {
                        warn!(group = %gid, id = %member, "group member not in catalog, ignoring");
                    }
                }
            }
            self.groups.insert(
                gid.clone(),
                Group {
                    id: gid,
                    members: known,
                    permission_requested: false,
                    permission_granted: false,
                },
            );
        }

        // Drive each entry through manifest and data reconciliation once;
        // anything held up by a disk fault continues on later ticks.
        let mut newly_queued = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            entry.tick(&mut self.disk);
            entry.tick(&mut self.disk);
            if entry.state() == EntryState::InQueueForDownload && !entry.is_marked_queued() {
                entry.mark_queued(true);
                newly_queued.push(id.clone());
            }
        }
        self.queue.extend(newly_queued);

        // Keep every declared id and its in-progress temp file.
        let mut keep: BTreeSet<String> = catalog.ids().map(str::to_string).collect();
        keep.extend(catalog.ids().map(|id| format!("{}.part", id)));
        self.cleaner.start(&mut self.disk, &keep);

        self.initialized = true;
        info!(
            entries = self.entries.len(),
            groups = self.groups.len(),
            "downloadables manager initialized"
        );
        Ok(())
    }

    /// Advance everything one tick. Call periodically from the embedding
    /// application's own loop; no internal timers exist.
    pub fn update(&mut self) {
        if !self.initialized {
            return;
        }

        for issue in self.disk.take_issues() {
            warn!(?issue, "disk issue");
            self.recent_disk_issues.push(issue);
        }

        self.process_outcomes();

        let mut newly_queued = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.state() != EntryState::Downloading {
                entry.tick(&mut self.disk);
            }
            if entry.state() == EntryState::InQueueForDownload && !entry.is_marked_queued() {
                entry.mark_queued(true);
                newly_queued.push(id.clone());
            }
        }
        self.queue.extend(newly_queued);

        // Mirror worker byte progress into the owning entries.
        for (id, entry) in self.entries.iter_mut() {
            if entry.state() == EntryState::Downloading {
                if let Some((bytes, _)) = self.downloader.progress_of(id) {
                    entry.set_progress_bytes(bytes);
                }
            }
        }

        if !self.cleaner.is_done() {
            self.cleaner.tick(&mut self.disk);
        }

        self.admit_downloads();
    }

    fn process_outcomes(&mut self) {
        for outcome in self.downloader.poll_outcomes() {
            let Some(entry) = self.entries.get_mut(&outcome.id) else {
                debug!(id = %outcome.id, "outcome for unknown id discarded");
                continue;
            };

            if entry.generation() != outcome.generation {
                debug!(id = %outcome.id, "outcome from reset entry discarded");
                continue;
            }

            let error_kind = outcome.error.as_ref().map(Error::kind);
            if let Some(kind) = error_kind {
                if kind.is_disk() {
                    self.disk.report_issue(kind);
                }
            }

            self.tracker.record_attempt(AttemptRecord {
                id: outcome.id.clone(),
                error: error_kind,
                duration: outcome.duration,
                bytes_transferred: outcome.bytes_downloaded,
                reachability_at_start: outcome.reachability_at_start,
                reachability_at_end: self.reachability,
            });

            let retry_allowed = match error_kind {
                Some(kind) => self.tracker.should_retry(&outcome.id, kind),
                None => true,
            };

            entry.on_download_finished(&mut self.disk, outcome.error, retry_allowed);
        }
    }

    /// Hand eligible queued entries to the downloader, FIFO, up to the
    /// concurrency cap. Blocked entries stay queued: backpressure, not
    /// failure.
    fn admit_downloads(&mut self) {
        if !self.automatic_enabled {
            return;
        }

        let mut slots = self
            .config
            .max_concurrent_downloads
            .saturating_sub(self.downloader.in_flight_count());
        let now = Instant::now();
        let mut index = 0;

        while index < self.queue.len() && slots > 0 {
            let id = self.queue[index].clone();

            let Some(entry) = self.entries.get_mut(&id) else {
                self.queue.remove(index);
                continue;
            };

            // Entries reset or finished since queueing drop out here.
            if entry.state() != EntryState::InQueueForDownload {
                entry.mark_queued(false);
                self.queue.remove(index);
                continue;
            }

            if self.downloader.is_downloading(&id) {
                index += 1;
                continue;
            }

            let granted = entry
                .groups()
                .iter()
                .any(|gid| self.groups.get(gid).is_some_and(|g| g.permission_granted));
            if policy::admission_error(self.reachability, granted).is_some() {
                index += 1;
                continue;
            }

            if !entry.backoff_expired(now, self.config.retry_delay) {
                index += 1;
                continue;
            }

            let mut url = format!("{}{}", self.url_base, id);
            if self.config.use_crc_in_url {
                url.push_str(&format!("?crc={}", entry.manifest().crc32));
            }

            let job = DownloadJob {
                id: id.clone(),
                generation: entry.generation(),
                url,
                expected_size: entry.total_bytes(),
                expected_crc32: entry.manifest().crc32,
                reachability: self.reachability,
            };

            entry.on_download_start();
            self.queue.remove(index);
            self.downloader.start(job);
            slots -= 1;
        }
    }

    // =========================================================================
    // Groups and permissions
    // =========================================================================

    /// Record that the consent prompt was shown for a group.
    pub fn groups_set_is_permission_requested(&mut self, group_id: &str, value: bool) {
        match self.groups.get_mut(group_id) {
            Some(group) => group.permission_requested = value,
            None => warn!(group = %group_id, "permission request recorded for unknown group"),
        }
    }

    /// Whether the consent prompt was shown for a group.
    pub fn groups_get_is_permission_requested(&self, group_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(Group::permission_requested)
            .unwrap_or(false)
    }

    /// Grant or revoke mobile-data consent for a group. Granting makes
    /// member ids eligible on the next tick; revoking never aborts an
    /// in-flight download, it only gates future queue admission.
    pub fn groups_set_is_permission_granted(&mut self, group_id: &str, value: bool) {
        match self.groups.get_mut(group_id) {
            Some(group) => {
                group.permission_granted = value;
                // Asking implies being answered; granting without a recorded
                // request also marks the group as requested.
                if value {
                    group.permission_requested = true;
                }
            }
            None => warn!(group = %group_id, "permission granted for unknown group"),
        }
    }

    /// Whether mobile-data consent is granted for a group.
    pub fn groups_get_is_permission_granted(&self, group_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(Group::permission_granted)
            .unwrap_or(false)
    }

    /// The group table, ordered by id.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Aggregate view over explicit ids.
    pub fn create_handle<I, S>(&self, ids: I) -> Handle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let mut group_ids = BTreeSet::new();
        for id in &ids {
            if let Some(entry) = self.entries.get(id) {
                group_ids.extend(entry.groups().iter().cloned());
            }
        }
        Handle::new(ids, group_ids)
    }

    /// Aggregate view over all members of the given groups.
    pub fn create_group_handle<I, S>(&self, group_ids: I) -> Handle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group_ids: BTreeSet<String> = group_ids.into_iter().map(Into::into).collect();
        let mut ids = BTreeSet::new();
        for gid in &group_ids {
            if let Some(group) = self.groups.get(gid) {
                ids.extend(group.members.iter().cloned());
            }
        }
        Handle::new(ids.into_iter().collect(), group_ids)
    }

    /// Aggregate view over every entry and group in the catalog.
    pub fn create_all_handle(&self) -> Handle {
        Handle::new(
            self.entries.keys().cloned().collect(),
            self.groups.keys().cloned().collect(),
        )
    }

    // =========================================================================
    // Per-id queries and runtime policy
    // =========================================================================

    /// Whether verified content for `id` is on disk.
    pub fn is_id_available(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(CatalogEntryStatus::is_available)
    }

    /// The status record for `id`.
    pub fn entry(&self, id: &str) -> Option<&CatalogEntryStatus> {
        self.entries.get(id)
    }

    /// All status records, ordered by id.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntryStatus> {
        self.entries.values()
    }

    /// Transfer speed of `id`'s in-flight download, if one is running.
    pub fn download_speed_of(&self, id: &str) -> Option<u64> {
        self.downloader.progress_of(id).map(|(_, speed)| speed)
    }

    /// Abandon any in-flight download for `id` and reconcile it from
    /// scratch. The worker's late outcome is discarded on arrival.
    pub fn reset_entry(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.reset();
            self.tracker.clear_id(id);
        }
    }

    /// Report the current network state. Read at every admission decision.
    pub fn set_reachability(&mut self, reachability: NetworkReachability) {
        self.reachability = reachability;
    }

    pub fn reachability(&self) -> NetworkReachability {
        self.reachability
    }

    /// Pause or resume handing queued entries to the downloader. While
    /// paused the queue holds; nothing errors.
    pub fn set_automatic_downloads_enabled(&mut self, enabled: bool) {
        self.automatic_enabled = enabled;
    }

    pub fn is_automatic_downloads_enabled(&self) -> bool {
        self.automatic_enabled
    }

    /// Whether the post-catalog cleanup sweep has finished.
    pub fn is_cleanup_done(&self) -> bool {
        self.cleaner.is_done()
    }

    /// Attempt telemetry.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Coalesced disk issues raised since the last call.
    pub fn take_disk_issues(&mut self) -> Vec<DiskIssue> {
        std::mem::take(&mut self.recent_disk_issues)
    }

    /// The resolved URL base downloads are fetched from.
    pub fn url_base(&self) -> &str {
        &self.url_base
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("entries", &self.entries.len())
            .field("groups", &self.groups.len())
            .field("queued", &self.queue.len())
            .field("reachability", &self.reachability)
            .field("automatic_enabled", &self.automatic_enabled)
            .finish_non_exhaustive()
    }
}
