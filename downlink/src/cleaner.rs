//! Incremental removal of files no longer declared by the catalog.
//!
//! After a catalog is loaded, any manifest or data file whose name is not
//! in the keep-set is an orphan from an older catalog and gets deleted.
//! The sweep runs incrementally, a bounded number of deletions per update
//! tick, so a large cache directory never stalls the caller. Failures on
//! individual files are logged and skipped; they never abort the sweep.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::disk::{DirectoryId, Disk};

/// Incremental orphan sweep over the manifests and downloads directories.
#[derive(Debug, Default)]
pub struct Cleaner {
    pending: Vec<(DirectoryId, String)>,
    batch_size: usize,
    started: bool,
    removed: usize,
    skipped: usize,
}

impl Cleaner {
    /// Create a cleaner deleting at most `batch_size` files per tick.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..Self::default()
        }
    }

    /// Snapshot both directory listings and queue every file whose name is
    /// not in `ids_to_keep` for deletion.
    ///
    /// A directory that cannot be listed contributes nothing to this sweep;
    /// the fault is reported through the disk layer's issue stream and the
    /// next catalog load sweeps again.
    pub fn start(&mut self, disk: &mut Disk, ids_to_keep: &BTreeSet<String>) {
        self.pending.clear();
        self.removed = 0;
        self.skipped = 0;
        self.started = true;

        for dir in [DirectoryId::Manifests, DirectoryId::Downloads] {
            match disk.list(dir) {
                Ok(names) => {
                    for name in names {
                        if !ids_to_keep.contains(&name) {
                            self.pending.push((dir, name));
                        }
                    }
                }
                Err(err) => {
                    warn!(?dir, %err, "could not list directory for cleanup");
                }
            }
        }

        if !self.pending.is_empty() {
            debug!(orphans = self.pending.len(), "cleanup sweep started");
        }
    }

    /// Delete up to one batch of orphans. No-op once the sweep is done.
    pub fn tick(&mut self, disk: &mut Disk) {
        if self.pending.is_empty() {
            return;
        }

        let batch = self.pending.len().min(self.batch_size);
        for (dir, name) in self.pending.drain(..batch) {
            match disk.delete(dir, &name) {
                Ok(()) => self.removed += 1,
                Err(err) => {
                    warn!(?dir, name, %err, "could not delete orphan, skipping");
                    self.skipped += 1;
                }
            }
        }

        if self.pending.is_empty() {
            debug!(
                removed = self.removed,
                skipped = self.skipped,
                "cleanup sweep finished"
            );
        }
    }

    /// Whether the sweep started by the last `start` call has finished.
    pub fn is_done(&self) -> bool {
        !self.started || self.pending.is_empty()
    }

    /// Files removed by the current sweep so far.
    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Files skipped after a deletion failure.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
