//! Attempt accounting and retry budget for downloads.
//!
//! The tracker records every download attempt (duration, bytes,
//! reachability at start and end) and answers one question for the state
//! machine: is this entry still worth retrying after a failure? Budgets
//! apply to network-class failures only; disk faults are retried at tick
//! cadence without consuming budget. The recorded history is advisory
//! telemetry; the tracker never blocks or retries on its own.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::ErrorKind;
use crate::policy::NetworkReachability;

/// Retry budget configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum failed network attempts per id before the entry is parked in
    /// a permanent error state.
    pub max_attempts: u32,

    /// Optional tighter caps per error kind.
    pub max_attempts_per_kind: HashMap<ErrorKind, u32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_attempts_per_kind: HashMap::new(),
        }
    }
}

impl TrackerConfig {
    /// Set the global failed-attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Cap failed attempts of one error kind.
    pub fn with_kind_cap(mut self, kind: ErrorKind, cap: u32) -> Self {
        self.max_attempts_per_kind.insert(kind, cap);
        self
    }
}

/// Telemetry record of one download attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub id: String,
    /// `None` for a successful attempt.
    pub error: Option<ErrorKind>,
    pub duration: Duration,
    pub bytes_transferred: u64,
    pub reachability_at_start: NetworkReachability,
    pub reachability_at_end: NetworkReachability,
}

/// Per-id attempt counters and advisory attempt history.
#[derive(Debug, Default)]
pub struct Tracker {
    config: TrackerConfig,
    failed_attempts: HashMap<String, u32>,
    failed_by_kind: HashMap<(String, ErrorKind), u32>,
    history: Vec<AttemptRecord>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Record an attempt. Failed network-class attempts consume budget;
    /// a success clears the id's counters.
    pub fn record_attempt(&mut self, record: AttemptRecord) {
        match record.error {
            Some(kind) if kind.is_network() => {
                *self.failed_attempts.entry(record.id.clone()).or_insert(0) += 1;
                *self
                    .failed_by_kind
                    .entry((record.id.clone(), kind))
                    .or_insert(0) += 1;
            }
            Some(_) => {}
            None => self.clear_id(&record.id),
        }
        self.history.push(record);
    }

    /// Whether a failure of `kind` on `id` should be retried.
    ///
    /// Disk-class kinds always retry. Network-class kinds retry while the
    /// id is under both the global cap and the kind's cap (if configured).
    pub fn should_retry(&self, id: &str, kind: ErrorKind) -> bool {
        if !kind.is_network() {
            return true;
        }

        let attempts = self.failed_attempts.get(id).copied().unwrap_or(0);
        if attempts >= self.config.max_attempts {
            debug!(id, ?kind, attempts, "retry budget exhausted");
            return false;
        }

        if let Some(&cap) = self.config.max_attempts_per_kind.get(&kind) {
            let kind_attempts = self
                .failed_by_kind
                .get(&(id.to_string(), kind))
                .copied()
                .unwrap_or(0);
            if kind_attempts >= cap {
                debug!(id, ?kind, kind_attempts, "per-kind retry budget exhausted");
                return false;
            }
        }

        true
    }

    /// Failed network attempts recorded for `id`.
    pub fn failed_attempts(&self, id: &str) -> u32 {
        self.failed_attempts.get(id).copied().unwrap_or(0)
    }

    /// Forget counters for `id` (fresh catalog entry or explicit reset).
    pub fn clear_id(&mut self, id: &str) {
        self.failed_attempts.remove(id);
        self.failed_by_kind.retain(|(rid, _), _| rid != id);
    }

    /// All recorded attempts, oldest first.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }
}
