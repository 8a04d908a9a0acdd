//! CRC32 calculation for blob verification.
//!
//! The catalog identifies blob versions by CRC32, so the same checksum is
//! computed in two places: incrementally while a download streams to disk,
//! and over an existing data file when the state machine has to re-verify
//! cached bytes.

use crc32fast::Hasher;

use crate::disk::{DirectoryId, Disk};
use crate::error::Result;

/// CRC32 of a byte slice.
pub fn crc32_of(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC32 of a stored file, read through the disk layer.
pub fn crc32_of_file(disk: &mut Disk, dir: DirectoryId, name: &str) -> Result<u32> {
    let bytes = disk.read(dir, name)?;
    Ok(crc32_of(&bytes))
}
