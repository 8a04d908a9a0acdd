//! Per-content-id lifecycle state machine.
//!
//! A [`CatalogEntryStatus`] combines the persisted manifest with what is
//! actually on disk for one id and decides whether the content is
//! available, stale, or must be (re)downloaded.
//!
//! # State machine
//!
//! ```text
//! ReadingManifest ──► ReadingDataInfo ──► InQueueForDownload ──► Downloading
//!                          │                      ▲                   │
//!                          ▼                      │ (budget left)     │
//!                      Available ◄────────────────┴───────────────────┤
//!                                                                     ▼
//!                                                              PermanentError
//! ```
//!
//! Disk faults never advance or regress the machine: the failing step
//! simply re-runs on the next update tick (the disk layer throttles the
//! resulting notifications). Only network failures consume the tracker's
//! retry budget.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::catalog::CatalogEntry;
use crate::disk::{DirectoryId, Disk};
use crate::downloader::crc32_of_file;
use crate::error::Error;
use crate::manifest::Manifest;

/// Lifecycle state of one content id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Loading the persisted manifest, if any.
    ReadingManifest,
    /// Comparing the data file on disk against the manifest.
    ReadingDataInfo,
    /// Waiting for the scheduler to hand the entry to the downloader.
    InQueueForDownload,
    /// A background download is in flight.
    Downloading,
    /// Verified bytes are on disk.
    Available,
    /// Retry budget exhausted; cleared only by a catalog change or reset.
    PermanentError,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::ReadingManifest => "reading-manifest",
            EntryState::ReadingDataInfo => "reading-data-info",
            EntryState::InQueueForDownload => "in-queue",
            EntryState::Downloading => "downloading",
            EntryState::Available => "available",
            EntryState::PermanentError => "permanent-error",
        }
    }
}

/// State machine for one content id. Owned and driven exclusively by the
/// manager's update tick.
#[derive(Debug)]
pub struct CatalogEntryStatus {
    id: String,
    catalog_crc32: u32,
    catalog_size: u64,
    groups: BTreeSet<String>,
    manifest: Manifest,
    /// Bytes of the data file on disk, or streamed so far while downloading.
    data_len: u64,
    state: EntryState,
    last_error: Option<Error>,
    last_failure_at: Option<Instant>,
    /// Bumped on reset; outcomes carrying an older generation are stale.
    generation: u64,
    /// Whether the id currently sits in the manager's download queue.
    queued: bool,
}

impl CatalogEntryStatus {
    /// Create the status for a catalog entry, ready to reconcile.
    pub fn new(id: impl Into<String>, entry: &CatalogEntry) -> Self {
        Self {
            id: id.into(),
            catalog_crc32: entry.crc32,
            catalog_size: entry.size,
            groups: entry.groups.clone(),
            manifest: Manifest::new(entry.crc32, entry.size),
            data_len: 0,
            state: EntryState::ReadingManifest,
            last_error: None,
            last_failure_at: None,
            generation: 0,
            queued: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_available(&self) -> bool {
        self.state == EntryState::Available
    }

    /// Total size of this blob per the catalog.
    pub fn total_bytes(&self) -> u64 {
        self.manifest.size
    }

    /// Bytes present locally: the full size once available, otherwise the
    /// partial/streamed length.
    pub fn downloaded_bytes(&self) -> u64 {
        if self.is_available() {
            self.manifest.size
        } else {
            self.data_len.min(self.manifest.size)
        }
    }

    /// The most recent error recorded for this entry, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Seed the generation counter so entries from different catalog loads
    /// can never be confused by a long-running worker's outcome.
    pub(crate) fn seed_generation(&mut self, base: u64) {
        self.generation = base;
    }

    /// Record membership in a permission group supplied at initialize time.
    pub(crate) fn add_group(&mut self, group_id: impl Into<String>) {
        self.groups.insert(group_id.into());
    }

    pub(crate) fn is_marked_queued(&self) -> bool {
        self.queued
    }

    pub(crate) fn mark_queued(&mut self, queued: bool) {
        self.queued = queued;
    }

    /// Whether the post-failure wait has elapsed.
    pub(crate) fn backoff_expired(&self, now: Instant, delay: Duration) -> bool {
        match self.last_failure_at {
            None => true,
            Some(at) => now.duration_since(at) >= delay,
        }
    }

    /// Update streamed byte count while downloading.
    pub(crate) fn set_progress_bytes(&mut self, bytes: u64) {
        if self.state == EntryState::Downloading {
            self.data_len = bytes;
        }
    }

    /// Advance the reconciliation states. Downloading and terminal states
    /// are driven by events, not ticks.
    pub fn tick(&mut self, disk: &mut Disk) {
        match self.state {
            EntryState::ReadingManifest => self.read_manifest_step(disk),
            EntryState::ReadingDataInfo => self.read_data_info_step(disk),
            _ => {}
        }
    }

    /// Abandon any in-flight download and reconcile from scratch.
    ///
    /// The in-flight worker is not interrupted; its outcome arrives tagged
    /// with the old generation and is discarded.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = EntryState::ReadingManifest;
        self.data_len = 0;
        self.last_error = None;
        self.last_failure_at = None;
        self.queued = false;
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn read_manifest_step(&mut self, disk: &mut Disk) {
        match disk.read_manifest(&self.id) {
            Err(err) => self.note_error(err),
            Ok(None) => {
                // First time this id is seen; keep the fresh manifest.
                self.state = EntryState::ReadingDataInfo;
            }
            Ok(Some(stored)) => {
                if stored.matches(self.catalog_crc32, self.catalog_size) {
                    // The stored record carries the download count and the
                    // verified flag; adopt it.
                    self.manifest = stored;
                    self.state = EntryState::ReadingDataInfo;
                } else {
                    self.invalidate_stale_manifest(disk);
                }
            }
        }
    }

    /// The catalog moved to a new CRC/size: the cached bytes belong to the
    /// old version. The data file must go before the manifest is rewritten,
    /// otherwise a failed delete would leave a manifest blessing stale bytes.
    fn invalidate_stale_manifest(&mut self, disk: &mut Disk) {
        debug!(id = %self.id, "manifest outdated by catalog, invalidating");

        if let Err(err) = disk.delete(DirectoryId::Downloads, &self.id) {
            self.note_error(err);
            return;
        }

        let fresh = Manifest::new(self.catalog_crc32, self.catalog_size);
        if let Err(err) = disk.write_manifest(&self.id, &fresh) {
            self.note_error(err);
            return;
        }

        self.manifest = fresh;
        self.data_len = 0;
        self.state = EntryState::ReadingDataInfo;
    }

    fn read_data_info_step(&mut self, disk: &mut Disk) {
        let exists = match disk.exists(DirectoryId::Downloads, &self.id) {
            Ok(exists) => exists,
            Err(err) => return self.note_error(err),
        };

        if !exists {
            self.data_len = 0;
            return self.enter_queue();
        }

        let len = match disk.file_len(DirectoryId::Downloads, &self.id) {
            Ok(len) => len,
            Err(err) => return self.note_error(err),
        };

        if len > self.manifest.size {
            self.discard_oversized(disk, len)
        } else if len < self.manifest.size {
            // Partial file from an interrupted session. Kept for progress
            // accounting, but the next download starts from scratch.
            self.data_len = len;
            self.enter_queue()
        } else if self.manifest.verified {
            // Size matches and a previous session verified the CRC; skip
            // re-hashing the file on every launch.
            self.data_len = len;
            self.state = EntryState::Available;
        } else {
            self.verify_full_file(disk, len)
        }
    }

    fn discard_oversized(&mut self, disk: &mut Disk, len: u64) {
        debug!(id = %self.id, len, expected = self.manifest.size, "data file oversized, discarding");

        if let Err(err) = disk.delete(DirectoryId::Downloads, &self.id) {
            return self.note_error(err);
        }

        self.data_len = 0;
        if self.manifest.verified {
            self.manifest.verified = false;
            if let Err(err) = disk.write_manifest(&self.id, &self.manifest) {
                // The file is gone, so a stale verified flag on disk cannot
                // bless anything; queue regardless.
                self.note_error(err);
            }
        }
        self.enter_queue();
    }

    fn verify_full_file(&mut self, disk: &mut Disk, len: u64) {
        let crc32 = match crc32_of_file(disk, DirectoryId::Downloads, &self.id) {
            Ok(crc32) => crc32,
            Err(err) => return self.note_error(err),
        };

        if crc32 == self.manifest.crc32 {
            self.manifest.verified = true;
            if let Err(err) = disk.write_manifest(&self.id, &self.manifest) {
                self.manifest.verified = false;
                return self.note_error(err);
            }
            self.data_len = len;
            self.state = EntryState::Available;
        } else {
            debug!(id = %self.id, crc32, expected = self.manifest.crc32, "cached data failed CRC, discarding");
            if let Err(err) = disk.delete(DirectoryId::Downloads, &self.id) {
                return self.note_error(err);
            }
            self.data_len = 0;
            self.enter_queue();
        }
    }

    /// Called by the manager when this entry is handed to the downloader.
    pub(crate) fn on_download_start(&mut self) {
        if self.state == EntryState::InQueueForDownload {
            self.state = EntryState::Downloading;
            self.queued = false;
            self.data_len = 0;
            self.last_error = None;
        }
    }

    /// Called by the manager when the downloader reports an outcome for the
    /// current generation.
    ///
    /// `retry_allowed` is the tracker's verdict for the outcome's error
    /// kind; it is ignored for successful outcomes.
    pub(crate) fn on_download_finished(
        &mut self,
        disk: &mut Disk,
        error: Option<Error>,
        retry_allowed: bool,
    ) {
        if self.state != EntryState::Downloading {
            return;
        }

        match error {
            None => {
                self.manifest.download_count += 1;
                self.manifest.verified = true;
                self.data_len = self.manifest.size;
                if let Err(err) = disk.write_manifest(&self.id, &self.manifest) {
                    // The verified bytes are published; the manifest write
                    // retries implicitly at next reconcile. Only the re-hash
                    // shortcut is lost until then.
                    self.note_error(err);
                }
                self.state = EntryState::Available;
            }
            Some(err) => {
                self.data_len = 0;
                self.last_failure_at = Some(Instant::now());
                self.last_error = Some(err);
                if retry_allowed {
                    self.state = EntryState::InQueueForDownload;
                } else {
                    debug!(id = %self.id, "retry budget exhausted, parking entry");
                    self.state = EntryState::PermanentError;
                }
            }
        }
    }

    fn enter_queue(&mut self) {
        self.state = EntryState::InQueueForDownload;
    }

    fn note_error(&mut self, err: Error) {
        debug!(id = %self.id, state = self.state.as_str(), error = %err, "entry step failed");
        self.last_error = Some(err);
    }
}
