//! Disk access layer for the two cache directories.
//!
//! [`Disk`] wraps a [`DiskDriver`] with the path policy of the cache (one
//! logical directory for manifests, one for downloaded data), translates
//! every storage fault into the typed error taxonomy, and coalesces
//! repeated same-kind faults into at most one [`DiskIssue`] per
//! notification window so a failing disk does not flood the host
//! application.
//!
//! Disk never retries on its own: the state machines re-enter the failing
//! step on their next update tick.

mod driver;

pub use driver::{DiskDriver, DiskOp, FaultKind, MemoryDiskDriver, StdDiskDriver};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::manifest::Manifest;

/// The two logical directories the cache owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryId {
    /// Small per-id manifest records.
    Manifests,
    /// Downloaded blobs, one file per id.
    Downloads,
}

/// A coalesced storage problem surfaced to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskIssue {
    /// Storage denied access.
    Unauthorized,
    /// The device is out of space.
    OutOfSpace,
    /// Some other I/O failure.
    Io,
}

impl DiskIssue {
    fn from_kind(kind: ErrorKind) -> Option<Self> {
        match kind {
            ErrorKind::DiskUnauthorized => Some(DiskIssue::Unauthorized),
            ErrorKind::DiskOutOfSpace => Some(DiskIssue::OutOfSpace),
            ErrorKind::DiskIo => Some(DiskIssue::Io),
            _ => None,
        }
    }

    fn slot(self) -> usize {
        match self {
            DiskIssue::Unauthorized => 0,
            DiskIssue::OutOfSpace => 1,
            DiskIssue::Io => 2,
        }
    }
}

const ISSUE_SLOTS: usize = 3;

/// Disk access for the cache directories with typed errors and throttled
/// issue reporting.
pub struct Disk {
    driver: Arc<dyn DiskDriver>,
    roots: [PathBuf; 2],
    issue_window: Duration,
    last_emitted: [Option<Instant>; ISSUE_SLOTS],
    pending_issues: VecDeque<DiskIssue>,
}

impl Disk {
    /// Create a disk layer over `driver`.
    ///
    /// `issue_window` is the minimum interval between two notifications of
    /// the same issue kind.
    pub fn new(
        driver: Arc<dyn DiskDriver>,
        manifests_root: PathBuf,
        downloads_root: PathBuf,
        issue_window: Duration,
    ) -> Self {
        Self {
            driver,
            roots: [manifests_root, downloads_root],
            issue_window,
            last_emitted: [None; ISSUE_SLOTS],
            pending_issues: VecDeque::new(),
        }
    }

    /// Root path of a logical directory.
    pub fn root(&self, dir: DirectoryId) -> &Path {
        match dir {
            DirectoryId::Manifests => &self.roots[0],
            DirectoryId::Downloads => &self.roots[1],
        }
    }

    fn full_path(&self, dir: DirectoryId, name: &str) -> PathBuf {
        self.root(dir).join(name)
    }

    /// Whether `name` exists under `dir`.
    pub fn exists(&mut self, dir: DirectoryId, name: &str) -> Result<bool> {
        let path = self.full_path(dir, name);
        self.driver
            .exists(&path)
            .map_err(|e| self.fault(&e, &path))
    }

    /// Read the full contents of `name` under `dir`.
    pub fn read(&mut self, dir: DirectoryId, name: &str) -> Result<Vec<u8>> {
        let path = self.full_path(dir, name);
        self.driver.read(&path).map_err(|e| self.fault(&e, &path))
    }

    /// Create or replace `name` under `dir`, creating the directory first.
    pub fn write(&mut self, dir: DirectoryId, name: &str, bytes: &[u8]) -> Result<()> {
        let root = self.root(dir).to_path_buf();
        let path = self.full_path(dir, name);
        self.driver
            .create_dir_all(&root)
            .and_then(|_| self.driver.write(&path, bytes))
            .map_err(|e| self.fault(&e, &path))
    }

    /// Delete `name` under `dir`. Deleting a missing file is not an error.
    pub fn delete(&mut self, dir: DirectoryId, name: &str) -> Result<()> {
        let path = self.full_path(dir, name);
        match self.driver.exists(&path) {
            Ok(false) => Ok(()),
            Ok(true) => self.driver.delete(&path).map_err(|e| self.fault(&e, &path)),
            Err(e) => Err(self.fault(&e, &path)),
        }
    }

    /// Length in bytes of `name` under `dir`.
    pub fn file_len(&mut self, dir: DirectoryId, name: &str) -> Result<u64> {
        let path = self.full_path(dir, name);
        self.driver
            .file_len(&path)
            .map_err(|e| self.fault(&e, &path))
    }

    /// File names directly under `dir`.
    pub fn list(&mut self, dir: DirectoryId) -> Result<Vec<String>> {
        let path = self.root(dir).to_path_buf();
        self.driver.list(&path).map_err(|e| self.fault(&e, &path))
    }

    /// Read and parse the manifest for `id`, or `None` if absent.
    ///
    /// A manifest that exists but cannot be parsed is reported as absent so
    /// the entry rebuilds it; the raw bytes are useless to the caller.
    pub fn read_manifest(&mut self, id: &str) -> Result<Option<Manifest>> {
        if !self.exists(DirectoryId::Manifests, id)? {
            return Ok(None);
        }

        let bytes = self.read(DirectoryId::Manifests, id)?;
        match Manifest::from_json_bytes(&bytes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(err) => {
                debug!(id, %err, "discarding unparseable manifest");
                Ok(None)
            }
        }
    }

    /// Persist the manifest for `id`.
    pub fn write_manifest(&mut self, id: &str, manifest: &Manifest) -> Result<()> {
        self.write(DirectoryId::Manifests, id, &manifest.to_json_bytes())
    }

    /// Record a disk fault observed outside this layer (the download worker
    /// writes through the raw driver) so it joins the same throttled
    /// notification stream.
    pub fn report_issue(&mut self, kind: ErrorKind) {
        if let Some(issue) = DiskIssue::from_kind(kind) {
            self.note_issue(issue);
        }
    }

    /// Drain the coalesced issue notifications raised since the last call.
    pub fn take_issues(&mut self) -> Vec<DiskIssue> {
        self.pending_issues.drain(..).collect()
    }

    fn fault(&mut self, err: &std::io::Error, path: &Path) -> Error {
        let error = Error::from_disk(err, path);
        self.report_issue(error.kind());
        error
    }

    fn note_issue(&mut self, issue: DiskIssue) {
        let slot = issue.slot();
        let now = Instant::now();
        let due = match self.last_emitted[slot] {
            None => true,
            Some(at) => now.duration_since(at) >= self.issue_window,
        };

        if due {
            self.last_emitted[slot] = Some(now);
            self.pending_issues.push_back(issue);
        }
    }
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("manifests_root", &self.roots[0])
            .field("downloads_root", &self.roots[1])
            .field("issue_window", &self.issue_window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_disk(driver: &MemoryDiskDriver, window: Duration) -> Disk {
        Disk::new(
            Arc::new(driver.clone()),
            PathBuf::from("/cache/metadata"),
            PathBuf::from("/cache/downloads"),
            window,
        )
    }

    #[test]
    fn test_write_read_under_directory() {
        let driver = MemoryDiskDriver::new();
        let mut disk = make_disk(&driver, Duration::from_secs(10));

        disk.write(DirectoryId::Downloads, "a", b"bytes").unwrap();
        assert!(disk.exists(DirectoryId::Downloads, "a").unwrap());
        assert!(!disk.exists(DirectoryId::Manifests, "a").unwrap());
        assert_eq!(disk.read(DirectoryId::Downloads, "a").unwrap(), b"bytes");
        assert_eq!(disk.file_len(DirectoryId::Downloads, "a").unwrap(), 5);
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let driver = MemoryDiskDriver::new();
        let mut disk = make_disk(&driver, Duration::from_secs(10));

        assert!(disk.delete(DirectoryId::Downloads, "ghost").is_ok());
    }

    #[test]
    fn test_faults_become_typed_errors() {
        let driver = MemoryDiskDriver::new();
        driver.place(Path::new("/cache/downloads/a"), b"x");
        driver.inject_fault(DiskOp::Read, "downloads/a", FaultKind::Unauthorized);

        let mut disk = make_disk(&driver, Duration::from_secs(10));
        let err = disk.read(DirectoryId::Downloads, "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DiskUnauthorized);
    }

    #[test]
    fn test_issue_coalescing_within_window() {
        let driver = MemoryDiskDriver::new();
        driver.inject_fault(DiskOp::Write, "downloads", FaultKind::OutOfSpace);

        let mut disk = make_disk(&driver, Duration::from_secs(60));

        for _ in 0..5 {
            let _ = disk.write(DirectoryId::Downloads, "a", b"x");
        }

        // Five identical faults inside one window collapse to one issue.
        assert_eq!(disk.take_issues(), vec![DiskIssue::OutOfSpace]);
        assert!(disk.take_issues().is_empty());
    }

    #[test]
    fn test_issue_window_reopens_after_expiry() {
        let driver = MemoryDiskDriver::new();
        driver.inject_fault(DiskOp::Write, "downloads", FaultKind::OutOfSpace);

        let mut disk = make_disk(&driver, Duration::from_millis(20));

        let _ = disk.write(DirectoryId::Downloads, "a", b"x");
        assert_eq!(disk.take_issues().len(), 1);

        std::thread::sleep(Duration::from_millis(30));
        let _ = disk.write(DirectoryId::Downloads, "a", b"x");
        assert_eq!(disk.take_issues().len(), 1);
    }

    #[test]
    fn test_issue_kinds_tracked_independently() {
        let driver = MemoryDiskDriver::new();
        driver.inject_fault(DiskOp::Write, "downloads", FaultKind::OutOfSpace);
        driver.inject_fault(DiskOp::Read, "metadata", FaultKind::Unauthorized);
        driver.place(Path::new("/cache/metadata/m"), b"x");

        let mut disk = make_disk(&driver, Duration::from_secs(60));

        let _ = disk.write(DirectoryId::Downloads, "a", b"x");
        let _ = disk.read(DirectoryId::Manifests, "m");

        let issues = disk.take_issues();
        assert!(issues.contains(&DiskIssue::OutOfSpace));
        assert!(issues.contains(&DiskIssue::Unauthorized));
    }

    #[test]
    fn test_manifest_roundtrip_through_disk() {
        let driver = MemoryDiskDriver::new();
        let mut disk = make_disk(&driver, Duration::from_secs(10));

        assert!(disk.read_manifest("a").unwrap().is_none());

        let manifest = Manifest::new(111, 10);
        disk.write_manifest("a", &manifest).unwrap();
        assert_eq!(disk.read_manifest("a").unwrap(), Some(manifest));
    }

    #[test]
    fn test_unparseable_manifest_reads_as_absent() {
        let driver = MemoryDiskDriver::new();
        driver.place(Path::new("/cache/metadata/a"), b"{broken");

        let mut disk = make_disk(&driver, Duration::from_secs(10));
        assert!(disk.read_manifest("a").unwrap().is_none());
    }
}
