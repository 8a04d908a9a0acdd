//! Error types for the download cache.
//!
//! Every failure in the subsystem is expressed through [`Error`], which keeps
//! the full detail (paths, URLs, status codes), and [`ErrorKind`], the
//! payload-free discriminant used for retry budgeting and for picking the
//! most severe error across a set of entries.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type for download cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling, downloading or cleaning content.
///
/// Variants carry string detail rather than `io::Error` sources so errors can
/// be cloned into per-entry last-error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Storage refused access (permissions, sandbox restrictions).
    #[error("disk access denied: {0}")]
    DiskUnauthorized(String),

    /// The device ran out of storage space during a write.
    #[error("disk out of space: {0}")]
    DiskOutOfSpace(String),

    /// Any other storage failure.
    #[error("disk I/O error: {0}")]
    DiskIo(String),

    /// The download URL could not be built or parsed.
    #[error("malformed download URL: {0}")]
    NetworkMalformedUrl(String),

    /// The server could not be reached (DNS, connect, reset).
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The request exceeded its timeout.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// The server answered with a non-success status code.
    #[error("HTTP status {status} for {url}")]
    NetworkHttpStatus { status: u16, url: String },

    /// Downloading is blocked until the user grants mobile-data consent.
    #[error("download requires Wi-Fi or mobile-data consent")]
    NetworkWifiRequired,

    /// Downloaded bytes did not match the catalog CRC32 (or size).
    #[error("integrity check failed: {0}")]
    IntegrityCrcMismatch(String),

    /// The catalog document could not be parsed.
    #[error("catalog parse error: {0}")]
    CatalogParse(String),

    /// An id was declared more than once while building a catalog.
    #[error("duplicate catalog entry: {0}")]
    CatalogDuplicateId(String),
}

impl Error {
    /// Translate a storage failure into the disk error taxonomy.
    ///
    /// Permission failures map to [`Error::DiskUnauthorized`], `ENOSPC` to
    /// [`Error::DiskOutOfSpace`], everything else to [`Error::DiskIo`].
    pub fn from_disk(err: &io::Error, path: &Path) -> Self {
        let detail = format!("{}: {}", path.display(), err);
        if err.kind() == io::ErrorKind::PermissionDenied {
            Error::DiskUnauthorized(detail)
        } else if err.raw_os_error() == Some(ENOSPC) {
            Error::DiskOutOfSpace(detail)
        } else {
            Error::DiskIo(detail)
        }
    }

    /// The payload-free discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DiskUnauthorized(_) => ErrorKind::DiskUnauthorized,
            Error::DiskOutOfSpace(_) => ErrorKind::DiskOutOfSpace,
            Error::DiskIo(_) => ErrorKind::DiskIo,
            Error::NetworkMalformedUrl(_) => ErrorKind::NetworkMalformedUrl,
            Error::NetworkUnreachable(_) => ErrorKind::NetworkUnreachable,
            Error::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            Error::NetworkHttpStatus { .. } => ErrorKind::NetworkHttpStatus,
            Error::NetworkWifiRequired => ErrorKind::NetworkWifiRequired,
            Error::IntegrityCrcMismatch(_) => ErrorKind::IntegrityCrcMismatch,
            Error::CatalogParse(_) => ErrorKind::CatalogParse,
            Error::CatalogDuplicateId(_) => ErrorKind::CatalogDuplicateId,
        }
    }
}

/// POSIX "no space left on device".
const ENOSPC: i32 = 28;

/// Discriminant for [`Error`], used where only the class of failure matters:
/// tracker budgets, issue coalescing and handle aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DiskUnauthorized,
    DiskOutOfSpace,
    DiskIo,
    NetworkMalformedUrl,
    NetworkUnreachable,
    NetworkTimeout,
    NetworkHttpStatus,
    NetworkWifiRequired,
    IntegrityCrcMismatch,
    CatalogParse,
    CatalogDuplicateId,
}

impl ErrorKind {
    /// True for failures produced by the network fetch itself.
    ///
    /// Only these consume the tracker's retry budget; disk faults are retried
    /// at tick cadence without a cap.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkMalformedUrl
                | ErrorKind::NetworkUnreachable
                | ErrorKind::NetworkTimeout
                | ErrorKind::NetworkHttpStatus
                | ErrorKind::IntegrityCrcMismatch
        )
    }

    /// True for failures raised by storage.
    pub fn is_disk(&self) -> bool {
        matches!(
            self,
            ErrorKind::DiskUnauthorized | ErrorKind::DiskOutOfSpace | ErrorKind::DiskIo
        )
    }

    /// Severity rank for picking the most important error across entries.
    ///
    /// Lower ranks are more severe. The order follows what a user can act on:
    /// connectivity and consent problems outrank storage problems, which
    /// outrank transient transfer failures.
    pub fn severity(&self) -> u8 {
        match self {
            ErrorKind::NetworkWifiRequired => 0,
            ErrorKind::NetworkUnreachable => 1,
            ErrorKind::DiskOutOfSpace => 2,
            ErrorKind::DiskUnauthorized => 3,
            ErrorKind::DiskIo => 4,
            ErrorKind::NetworkTimeout => 5,
            ErrorKind::NetworkHttpStatus => 6,
            ErrorKind::NetworkMalformedUrl => 7,
            ErrorKind::IntegrityCrcMismatch => 8,
            ErrorKind::CatalogParse => 9,
            ErrorKind::CatalogDuplicateId => 10,
        }
    }

    /// Returns the more severe of two kinds.
    pub fn most_severe(a: ErrorKind, b: ErrorKind) -> ErrorKind {
        if b.severity() < a.severity() {
            b
        } else {
            a
        }
    }
}
