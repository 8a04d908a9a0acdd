//! Downlink - a catalog-driven download cache for remote content.
//!
//! Downlink reconciles a server-declared catalog of content-addressed
//! blobs against local disk state, downloads missing or outdated blobs
//! over HTTP, verifies CRC32 integrity, enforces data-usage consent
//! (Wi-Fi vs. mobile data) and garbage-collects files the catalog no
//! longer declares.
//!
//! The embedding application owns the loop: construct a
//! [`manager::Manager`], call `initialize` with a catalog document, call
//! `update` periodically and observe progress through
//! [`manager::Handle`]s. Storage and transport sit behind the
//! [`disk::DiskDriver`] and [`downloader::NetworkDriver`] traits, with
//! production and fault-injecting implementations of each.

pub mod catalog;
pub mod cleaner;
pub mod disk;
pub mod downloader;
pub mod entry;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod policy;
pub mod tracker;

pub use catalog::{Catalog, CatalogEntry, UrlResolver};
pub use disk::{DirectoryId, Disk, DiskDriver, DiskIssue, MemoryDiskDriver, StdDiskDriver};
pub use downloader::{HttpNetworkDriver, MockNetworkDriver, NetworkDriver};
pub use entry::{CatalogEntryStatus, EntryState};
pub use error::{Error, ErrorKind, Result};
pub use manager::{Handle, Manager, ManagerConfig};
pub use manifest::Manifest;
pub use policy::NetworkReachability;
pub use tracker::{AttemptRecord, Tracker, TrackerConfig};
