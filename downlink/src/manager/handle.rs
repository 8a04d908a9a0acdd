//! Caller-facing aggregate view over a set of content ids.
//!
//! A [`Handle`] is what UI and asset-loading collaborators poll: one
//! progress/availability/error surface over the ids they care about. It
//! holds no entry state of its own: every accessor recomputes from the
//! manager, so a handle can never serve stale progress or errors. The only
//! mutation a handle performs is recording permission decisions, which
//! flow back into the owning groups.

use std::collections::BTreeSet;

use crate::entry::EntryState;
use crate::error::ErrorKind;
use crate::manager::Manager;
use crate::policy::NetworkReachability;

/// Read-mostly view over a set of ids and the permission groups covering
/// them. Construct through [`Manager::create_handle`] and friends.
#[derive(Debug, Clone)]
pub struct Handle {
    ids: Vec<String>,
    group_ids: BTreeSet<String>,
}

impl Handle {
    pub(crate) fn new(ids: Vec<String>, group_ids: BTreeSet<String>) -> Self {
        Self { ids, group_ids }
    }

    /// The content ids this handle aggregates.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The permission groups covering those ids.
    pub fn group_ids(&self) -> &BTreeSet<String> {
        &self.group_ids
    }

    /// Whether every id in the handle is available on disk.
    pub fn is_available(&self, manager: &Manager) -> bool {
        self.ids.iter().all(|id| manager.is_id_available(id))
    }

    /// Total size in bytes of all member blobs.
    pub fn total_bytes(&self, manager: &Manager) -> u64 {
        self.ids
            .iter()
            .filter_map(|id| manager.entry(id))
            .map(|entry| entry.total_bytes())
            .sum()
    }

    /// Bytes of member blobs present locally so far.
    pub fn downloaded_bytes(&self, manager: &Manager) -> u64 {
        self.ids
            .iter()
            .filter_map(|id| manager.entry(id))
            .map(|entry| entry.downloaded_bytes())
            .sum()
    }

    /// Download progress in `[0, 1]`.
    pub fn progress(&self, manager: &Manager) -> f32 {
        if self.is_available(manager) {
            return 1.0;
        }

        let total = self.total_bytes(manager);
        if total == 0 {
            return 0.0;
        }

        (self.downloaded_bytes(manager) as f32 / total as f32).clamp(0.0, 1.0)
    }

    /// Combined transfer speed in bytes per second, counted only while one
    /// of this handle's members is actually downloading.
    pub fn speed(&self, manager: &Manager) -> u64 {
        self.ids
            .iter()
            .filter_map(|id| manager.download_speed_of(id))
            .sum()
    }

    /// Whether the user still has to be asked for download consent: true
    /// while content is missing and some covering group was never asked.
    pub fn needs_permission_request(&self, manager: &Manager) -> bool {
        if self.is_available(manager) {
            return false;
        }

        self.group_ids
            .iter()
            .any(|gid| !manager.groups_get_is_permission_requested(gid))
    }

    /// Whether consent is in place for every covering group.
    pub fn is_permission_granted(&self, manager: &Manager) -> bool {
        if self.needs_permission_request(manager) {
            return false;
        }

        self.group_ids
            .iter()
            .all(|gid| manager.groups_get_is_permission_granted(gid))
    }

    /// Record that the user was shown the consent prompt.
    pub fn set_permission_requested(&self, manager: &mut Manager, value: bool) {
        for gid in &self.group_ids {
            manager.groups_set_is_permission_requested(gid, value);
        }
    }

    /// Record the user's consent decision for every covering group.
    pub fn set_permission_granted(&self, manager: &mut Manager, value: bool) {
        for gid in &self.group_ids {
            manager.groups_set_is_permission_granted(gid, value);
        }
    }

    /// The most severe error currently affecting this handle, or `None`.
    ///
    /// Checked in order of severity: no connection, then missing mobile-data
    /// consent, then the worst per-entry error. While any member is actively
    /// downloading, per-entry errors are suppressed: there is progress, so
    /// there is nothing for the user to act on. A disabled automatic
    /// downloader is backpressure, not an error.
    pub fn error(&self, manager: &Manager) -> Option<ErrorKind> {
        if self.is_available(manager) {
            return None;
        }

        match manager.reachability() {
            NetworkReachability::NotReachable => return Some(ErrorKind::NetworkUnreachable),
            NetworkReachability::ViaMobileData if !self.is_permission_granted(manager) => {
                return Some(ErrorKind::NetworkWifiRequired)
            }
            _ => {}
        }

        let mut worst: Option<ErrorKind> = None;
        for id in &self.ids {
            let Some(entry) = manager.entry(id) else {
                continue;
            };

            if entry.state() == EntryState::Downloading {
                return None;
            }

            if let Some(kind) = entry.last_error().map(|e| e.kind()) {
                worst = Some(match worst {
                    None => kind,
                    Some(current) => ErrorKind::most_severe(current, kind),
                });
            }
        }

        worst
    }
}
