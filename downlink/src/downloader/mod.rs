//! Background HTTP downloads with integrity verification.
//!
//! The [`Downloader`] performs one blocking fetch per in-flight content id
//! on a dedicated worker thread. Each worker:
//!
//! 1. streams the response body to `<id>.part` in the downloads directory,
//! 2. hashes CRC32 while writing and tracks byte progress in shared
//!    atomic counters,
//! 3. on a complete, matching transfer atomically renames `<id>.part` to
//!    `<id>` — no reader ever observes a partially written blob under its
//!    published name,
//! 4. reports a [`DownloadOutcome`] over an `mpsc` channel.
//!
//! Workers never touch shared cache state. Completions are drained by the
//! manager's update tick via [`Downloader::poll_outcomes`], so all state
//! transitions stay on the single update thread. Outcomes carry the
//! generation the job was started with; a stale generation (the entry was
//! reset meanwhile) is discarded on arrival.

mod checksum;
mod driver;

pub use checksum::{crc32_of, crc32_of_file};
pub use driver::{
    HttpNetworkDriver, MockNetworkDriver, NetworkDriver, NetworkResponse, DEFAULT_TIMEOUT,
};

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::disk::DiskDriver;
use crate::error::{Error, Result};
use crate::policy::NetworkReachability;

/// Read/write chunk size while streaming a body to disk (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Suffix for the temporary file a download streams into.
const PART_SUFFIX: &str = ".part";

/// One download to perform.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Content id; also the published file name.
    pub id: String,
    /// Entry generation at start time; outcomes from older generations are
    /// discarded by the manager.
    pub generation: u64,
    /// Fully resolved download URL.
    pub url: String,
    /// Expected blob size from the catalog.
    pub expected_size: u64,
    /// Expected CRC32 from the catalog.
    pub expected_crc32: u32,
    /// Reachability when the job was admitted, echoed back for telemetry.
    pub reachability: NetworkReachability,
}

/// Result of one download attempt, delivered on the update thread.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub id: String,
    pub generation: u64,
    /// Bytes received in this attempt (also set on failures, for telemetry).
    pub bytes_downloaded: u64,
    /// `None` on a complete, verified transfer.
    pub error: Option<Error>,
    pub duration: Duration,
    /// Reachability at admission time, from the job.
    pub reachability_at_start: NetworkReachability,
}

impl DownloadOutcome {
    /// Whether the attempt completed and verified.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Byte progress shared between a worker thread and the update thread.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    bytes: AtomicU64,
    bytes_per_sec: AtomicU64,
}

impl DownloadProgress {
    /// Bytes received so far in the current attempt.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Transfer speed estimate in bytes per second.
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: u64, elapsed: Duration) {
        self.bytes.store(bytes, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64().max(0.01);
        self.bytes_per_sec
            .store((bytes as f64 / secs) as u64, Ordering::Relaxed);
    }
}

struct InFlight {
    generation: u64,
    progress: Arc<DownloadProgress>,
    handle: Option<JoinHandle<()>>,
}

/// Spawns and tracks background download workers.
pub struct Downloader {
    network: Arc<dyn NetworkDriver>,
    disk_driver: Arc<dyn DiskDriver>,
    downloads_root: PathBuf,
    outcome_tx: Sender<DownloadOutcome>,
    outcome_rx: Receiver<DownloadOutcome>,
    in_flight: HashMap<String, InFlight>,
}

impl Downloader {
    /// Create a downloader writing into `downloads_root` through
    /// `disk_driver` and fetching through `network`.
    pub fn new(
        network: Arc<dyn NetworkDriver>,
        disk_driver: Arc<dyn DiskDriver>,
        downloads_root: PathBuf,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Self {
            network,
            disk_driver,
            downloads_root,
            outcome_tx,
            outcome_rx,
            in_flight: HashMap::new(),
        }
    }

    /// Number of downloads currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a download for `id` is in flight.
    pub fn is_downloading(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Byte progress and speed of the in-flight download for `id`.
    pub fn progress_of(&self, id: &str) -> Option<(u64, u64)> {
        self.in_flight
            .get(id)
            .map(|flight| (flight.progress.bytes(), flight.progress.bytes_per_sec()))
    }

    /// Start a background download. Returns `false` (and does nothing) if a
    /// download for this id is already in flight.
    pub fn start(&mut self, job: DownloadJob) -> bool {
        if self.in_flight.contains_key(&job.id) {
            warn!(id = %job.id, "download already in flight, ignoring start");
            return false;
        }

        debug!(id = %job.id, url = %job.url, "starting download");

        let progress = Arc::new(DownloadProgress::default());
        let worker = Worker {
            network: Arc::clone(&self.network),
            disk_driver: Arc::clone(&self.disk_driver),
            downloads_root: self.downloads_root.clone(),
            progress: Arc::clone(&progress),
            outcome_tx: self.outcome_tx.clone(),
        };

        let id = job.id.clone();
        let generation = job.generation;
        let handle = std::thread::spawn(move || worker.run(job));

        self.in_flight.insert(
            id,
            InFlight {
                generation,
                progress,
                handle: Some(handle),
            },
        );
        true
    }

    /// Drain finished downloads. Called once per update tick.
    pub fn poll_outcomes(&mut self) -> Vec<DownloadOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.reap(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Remove the in-flight record matching this outcome, if it is still the
    /// current one (a reset may have started a newer download for the id).
    fn reap(&mut self, outcome: &DownloadOutcome) {
        let matches = self
            .in_flight
            .get(&outcome.id)
            .is_some_and(|flight| flight.generation == outcome.generation);
        if matches {
            if let Some(mut flight) = self.in_flight.remove(&outcome.id) {
                if let Some(handle) = flight.handle.take() {
                    // The worker sent its outcome as the final act; the join
                    // completes immediately.
                    let _ = handle.join();
                }
            }
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("downloads_root", &self.downloads_root)
            .field("in_flight", &self.in_flight.keys())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Everything a worker thread owns. No shared cache state in here: the
/// worker talks to the raw disk driver and reports back over the channel.
struct Worker {
    network: Arc<dyn NetworkDriver>,
    disk_driver: Arc<dyn DiskDriver>,
    downloads_root: PathBuf,
    progress: Arc<DownloadProgress>,
    outcome_tx: Sender<DownloadOutcome>,
}

impl Worker {
    fn run(self, job: DownloadJob) {
        let started = Instant::now();
        let result = self.download(&job, started);

        let outcome = DownloadOutcome {
            id: job.id,
            generation: job.generation,
            bytes_downloaded: self.progress.bytes(),
            error: result.err(),
            duration: started.elapsed(),
            reachability_at_start: job.reachability,
        };

        // The receiver only disappears when the manager is dropped; nothing
        // left to report to in that case.
        let _ = self.outcome_tx.send(outcome);
    }

    fn download(&self, job: &DownloadJob, started: Instant) -> Result<()> {
        let part_name = format!("{}{}", job.id, PART_SUFFIX);
        let part_path = self.downloads_root.join(&part_name);
        let final_path = self.downloads_root.join(&job.id);

        self.disk_driver
            .create_dir_all(&self.downloads_root)
            .map_err(|e| Error::from_disk(&e, &self.downloads_root))?;

        let response = self.network.fetch(&job.url)?;

        let stream_result = self.stream_body(response, &part_path, job, started);

        match stream_result {
            Ok(crc32) if crc32 == job.expected_crc32 && self.progress.bytes() == job.expected_size => {
                self.disk_driver
                    .rename(&part_path, &final_path)
                    .map_err(|e| Error::from_disk(&e, &part_path))
            }
            Ok(crc32) => {
                self.discard_part(&part_path);
                Err(Error::IntegrityCrcMismatch(format!(
                    "{}: got crc32 {} / {} bytes, expected crc32 {} / {} bytes",
                    job.id,
                    crc32,
                    self.progress.bytes(),
                    job.expected_crc32,
                    job.expected_size
                )))
            }
            Err(err) => {
                self.discard_part(&part_path);
                Err(err)
            }
        }
    }

    /// Stream the body into the part file, hashing as it goes. Returns the
    /// CRC32 of the received bytes.
    fn stream_body(
        &self,
        mut response: NetworkResponse,
        part_path: &Path,
        job: &DownloadJob,
        started: Instant,
    ) -> Result<u32> {
        let mut writer = self
            .disk_driver
            .open_write(part_path)
            .map_err(|e| Error::from_disk(&e, part_path))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut received: u64 = 0;

        loop {
            let n = response
                .body
                .read(&mut buffer)
                .map_err(|e| classify_body_error(&e, &job.url))?;
            if n == 0 {
                break;
            }

            writer
                .write_all(&buffer[..n])
                .map_err(|e| Error::from_disk(&e, part_path))?;

            hasher.update(&buffer[..n]);
            received += n as u64;
            self.progress.record(received, started.elapsed());
        }

        writer
            .flush()
            .map_err(|e| Error::from_disk(&e, part_path))?;
        drop(writer);

        Ok(hasher.finalize())
    }

    /// Best-effort removal of a part file after a failed attempt; downloads
    /// restart from scratch, so stale part bytes are never reused.
    fn discard_part(&self, part_path: &Path) {
        if let Ok(true) = self.disk_driver.exists(part_path) {
            if let Err(e) = self.disk_driver.delete(part_path) {
                debug!(path = %part_path.display(), error = %e, "could not remove part file");
            }
        }
    }
}

/// Classify an error raised while reading the response body.
fn classify_body_error(err: &std::io::Error, url: &str) -> Error {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            Error::NetworkTimeout(url.to_string())
        }
        _ => Error::NetworkUnreachable(format!("{}: {}", url, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDiskDriver;
    use crate::error::ErrorKind;

    const ROOT: &str = "/cache/downloads";

    fn make_downloader(network: &MockNetworkDriver, disk: &MemoryDiskDriver) -> Downloader {
        Downloader::new(
            Arc::new(network.clone()),
            Arc::new(disk.clone()),
            PathBuf::from(ROOT),
        )
    }

    fn job_for(id: &str, body: &[u8]) -> DownloadJob {
        DownloadJob {
            id: id.to_string(),
            generation: 0,
            url: format!("http://cdn.example/content/{}", id),
            expected_size: body.len() as u64,
            expected_crc32: crc32_of(body),
            reachability: NetworkReachability::ViaWifi,
        }
    }

    /// Poll until exactly one outcome arrives or the deadline passes.
    fn wait_for_outcome(downloader: &mut Downloader) -> DownloadOutcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let mut outcomes = downloader.poll_outcomes();
            if let Some(outcome) = outcomes.pop() {
                return outcome;
            }
            assert!(Instant::now() < deadline, "timed out waiting for outcome");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_successful_download_publishes_atomically() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.serve("/a", b"ten bytes!");

        let mut downloader = make_downloader(&network, &disk);
        assert!(downloader.start(job_for("a", b"ten bytes!")));
        assert_eq!(downloader.in_flight_count(), 1);

        let outcome = wait_for_outcome(&mut downloader);
        assert!(outcome.is_success(), "error: {:?}", outcome.error);
        assert_eq!(outcome.bytes_downloaded, 10);
        assert_eq!(downloader.in_flight_count(), 0);

        assert_eq!(
            disk.peek(Path::new("/cache/downloads/a")).as_deref(),
            Some(b"ten bytes!".as_slice())
        );
        assert!(disk.peek(Path::new("/cache/downloads/a.part")).is_none());
    }

    #[test]
    fn test_crc_mismatch_discards_file() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.serve("/a", b"corrupted!");

        let mut job = job_for("a", b"corrupted!");
        job.expected_crc32 = job.expected_crc32.wrapping_add(1);

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job);

        let outcome = wait_for_outcome(&mut downloader);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::IntegrityCrcMismatch)
        );
        assert!(disk.peek(Path::new("/cache/downloads/a")).is_none());
        assert!(disk.peek(Path::new("/cache/downloads/a.part")).is_none());
    }

    #[test]
    fn test_short_body_is_integrity_failure() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.serve("/a", b"short");

        let mut job = job_for("a", b"short");
        job.expected_size = 100;

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job);

        let outcome = wait_for_outcome(&mut downloader);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::IntegrityCrcMismatch)
        );
    }

    #[test]
    fn test_http_failure_reports_taxonomy_kind() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        // Nothing scripted: the mock answers 404.

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job_for("a", b"whatever"));

        let outcome = wait_for_outcome(&mut downloader);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::NetworkHttpStatus)
        );
    }

    #[test]
    fn test_mid_stream_failure_reports_bytes_received() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.fail_mid_stream("/a", b"1234", Error::NetworkUnreachable("reset".into()));

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job_for("a", b"12345678"));

        let outcome = wait_for_outcome(&mut downloader);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::NetworkUnreachable)
        );
        assert_eq!(outcome.bytes_downloaded, 4);
        assert!(disk.peek(Path::new("/cache/downloads/a.part")).is_none());
    }

    #[test]
    fn test_disk_fault_during_write_is_reported() {
        use crate::disk::{DiskOp, FaultKind};

        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.serve("/a", b"payload");
        disk.inject_fault(DiskOp::Write, "a.part", FaultKind::Unauthorized);

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job_for("a", b"payload"));

        let outcome = wait_for_outcome(&mut downloader);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::DiskUnauthorized)
        );
    }

    #[test]
    fn test_second_start_for_same_id_is_rejected() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        network.serve("/a", b"payload");

        let mut downloader = make_downloader(&network, &disk);
        assert!(downloader.start(job_for("a", b"payload")));
        assert!(!downloader.start(job_for("a", b"payload")));
        assert_eq!(downloader.in_flight_count(), 1);

        wait_for_outcome(&mut downloader);
    }

    #[test]
    fn test_progress_is_observable() {
        let network = MockNetworkDriver::new();
        let disk = MemoryDiskDriver::new();
        let body = vec![7u8; 256 * 1024];
        network.serve("/big", &body);

        let mut downloader = make_downloader(&network, &disk);
        downloader.start(job_for("big", &body));

        let outcome = wait_for_outcome(&mut downloader);
        assert!(outcome.is_success());
        assert_eq!(outcome.bytes_downloaded, body.len() as u64);
    }
}
