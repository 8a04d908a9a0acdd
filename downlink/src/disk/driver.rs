//! Storage driver abstraction for testability.
//!
//! [`DiskDriver`] is the seam between the cache and the actual storage
//! backend. Production code uses [`StdDiskDriver`] (plain `std::fs`);
//! tests use [`MemoryDiskDriver`], an in-memory tree that can be scripted
//! to fail specific operations on specific paths, so every disk-fault
//! branch of the state machines can be exercised deterministically.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Storage operations the cache performs, used to target fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskOp {
    Exists,
    Read,
    Write,
    Delete,
    FileLen,
    List,
    Rename,
}

/// Trait for raw storage operations on full paths.
///
/// Implementations must be `Send + Sync`: the download worker threads write
/// through the same driver the update thread reads through. All path policy
/// (which directory a file lives in) stays above this trait.
pub trait DiskDriver: Send + Sync {
    /// Whether a file exists at `path`.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Read the full contents of the file at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or replace the file at `path` with `bytes`.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Open a streaming writer that creates or replaces the file at `path`.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Delete the file at `path`. Deleting a missing file is an error.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Length in bytes of the file at `path`.
    fn file_len(&self, path: &Path) -> io::Result<u64>;

    /// File names (not paths) directly under `dir`. A missing directory
    /// yields an empty list.
    fn list(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Atomically rename `from` to `to` (same directory).
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create `dir` and any missing parents.
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
}

// =============================================================================
// Production driver
// =============================================================================

/// Production driver backed by `std::fs`.
#[derive(Debug, Default, Clone)]
pub struct StdDiskDriver;

impl StdDiskDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DiskDriver for StdDiskDriver {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = std::fs::File::create(path)?;
        Ok(Box::new(io::BufWriter::new(file)))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        if !dir.try_exists()? {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)
    }
}

// =============================================================================
// In-memory driver with fault injection
// =============================================================================

/// The class of storage failure a scripted fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `EACCES`-style permission failure.
    Unauthorized,
    /// `ENOSPC` out-of-space failure.
    OutOfSpace,
    /// Generic I/O failure.
    Io,
}

impl FaultKind {
    fn to_io_error(self) -> io::Error {
        match self {
            FaultKind::Unauthorized => {
                io::Error::new(io::ErrorKind::PermissionDenied, "injected: access denied")
            }
            FaultKind::OutOfSpace => io::Error::from_raw_os_error(28),
            FaultKind::Io => io::Error::other("injected: I/O failure"),
        }
    }
}

/// A scripted fault: fail `op` for every path containing `path_fragment`.
#[derive(Debug, Clone)]
struct Fault {
    op: DiskOp,
    path_fragment: String,
    kind: FaultKind,
}

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    faults: Vec<Fault>,
}

impl MemoryTree {
    fn check(&self, op: DiskOp, path: &Path) -> io::Result<()> {
        let path_str = path.to_string_lossy();
        for fault in &self.faults {
            if fault.op == op && path_str.contains(&fault.path_fragment) {
                return Err(fault.kind.to_io_error());
            }
        }
        Ok(())
    }
}

/// In-memory driver with scripted fault injection.
///
/// Clones share the same tree, so a clone handed to a download worker and
/// the original held by the test observe each other's writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryDiskDriver {
    tree: Arc<Mutex<MemoryTree>>,
}

impl MemoryDiskDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `op` on paths containing `path_fragment` with `kind`,
    /// until faults are cleared.
    pub fn inject_fault(&self, op: DiskOp, path_fragment: &str, kind: FaultKind) {
        self.tree.lock().faults.push(Fault {
            op,
            path_fragment: path_fragment.to_string(),
            kind,
        });
    }

    /// Remove all scripted faults.
    pub fn clear_faults(&self) {
        self.tree.lock().faults.clear();
    }

    /// Test helper: read a file without going through the fault table.
    pub fn peek(&self, path: &Path) -> Option<Vec<u8>> {
        self.tree.lock().files.get(path).cloned()
    }

    /// Test helper: place a file without going through the fault table.
    pub fn place(&self, path: &Path, bytes: &[u8]) {
        self.tree.lock().files.insert(path.to_path_buf(), bytes.to_vec());
    }
}

impl DiskDriver for MemoryDiskDriver {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        let tree = self.tree.lock();
        tree.check(DiskOp::Exists, path)?;
        Ok(tree.files.contains_key(path))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let tree = self.tree.lock();
        tree.check(DiskOp::Read, path)?;
        tree.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut tree = self.tree.lock();
        tree.check(DiskOp::Write, path)?;
        tree.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        {
            let mut tree = self.tree.lock();
            tree.check(DiskOp::Write, path)?;
            tree.files.insert(path.to_path_buf(), Vec::new());
        }
        Ok(Box::new(MemoryFileWriter {
            tree: Arc::clone(&self.tree),
            path: path.to_path_buf(),
        }))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree.lock();
        tree.check(DiskOp::Delete, path)?;
        tree.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        let tree = self.tree.lock();
        tree.check(DiskOp::FileLen, path)?;
        tree.files
            .get(path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        let tree = self.tree.lock();
        tree.check(DiskOp::List, dir)?;
        let mut names: Vec<String> = tree
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut tree = self.tree.lock();
        tree.check(DiskOp::Rename, from)?;
        let bytes = tree
            .files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        tree.files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        // Directories are implicit in the in-memory tree; only the fault
        // table applies.
        self.tree.lock().check(DiskOp::Write, dir)
    }
}

/// Streaming writer for [`MemoryDiskDriver`]; appends into the shared tree.
struct MemoryFileWriter {
    tree: Arc<Mutex<MemoryTree>>,
    path: PathBuf,
}

impl Write for MemoryFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut tree = self.tree.lock();
        tree.check(DiskOp::Write, &self.path)?;
        tree.files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_driver_write_read_delete() {
        let driver = MemoryDiskDriver::new();
        let path = Path::new("/cache/downloads/a");

        assert!(!driver.exists(path).unwrap());
        driver.write(path, b"hello").unwrap();
        assert!(driver.exists(path).unwrap());
        assert_eq!(driver.read(path).unwrap(), b"hello");
        assert_eq!(driver.file_len(path).unwrap(), 5);

        driver.delete(path).unwrap();
        assert!(!driver.exists(path).unwrap());
        assert!(driver.delete(path).is_err());
    }

    #[test]
    fn test_memory_driver_list_is_per_directory() {
        let driver = MemoryDiskDriver::new();
        driver.write(Path::new("/cache/downloads/b"), b"x").unwrap();
        driver.write(Path::new("/cache/downloads/a"), b"x").unwrap();
        driver.write(Path::new("/cache/metadata/a"), b"x").unwrap();

        let names = driver.list(Path::new("/cache/downloads")).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        assert!(driver.list(Path::new("/cache/nothing")).unwrap().is_empty());
    }

    #[test]
    fn test_memory_driver_rename() {
        let driver = MemoryDiskDriver::new();
        driver.write(Path::new("/d/a.part"), b"data").unwrap();

        driver
            .rename(Path::new("/d/a.part"), Path::new("/d/a"))
            .unwrap();

        assert!(!driver.exists(Path::new("/d/a.part")).unwrap());
        assert_eq!(driver.read(Path::new("/d/a")).unwrap(), b"data");
    }

    #[test]
    fn test_memory_driver_streaming_writer() {
        let driver = MemoryDiskDriver::new();
        let path = Path::new("/d/a.part");

        let mut writer = driver.open_write(path).unwrap();
        writer.write_all(b"chunk1").unwrap();
        writer.write_all(b"chunk2").unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert_eq!(driver.read(path).unwrap(), b"chunk1chunk2");
    }

    #[test]
    fn test_fault_injection_targets_op_and_path() {
        let driver = MemoryDiskDriver::new();
        driver.write(Path::new("/m/a"), b"x").unwrap();
        driver.inject_fault(DiskOp::Read, "/m/a", FaultKind::Unauthorized);

        let err = driver.read(Path::new("/m/a")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        // Other ops and other paths are unaffected.
        assert!(driver.exists(Path::new("/m/a")).unwrap());
        driver.write(Path::new("/m/b"), b"y").unwrap();
        assert_eq!(driver.read(Path::new("/m/b")).unwrap(), b"y");

        driver.clear_faults();
        assert_eq!(driver.read(Path::new("/m/a")).unwrap(), b"x");
    }

    #[test]
    fn test_fault_injection_out_of_space() {
        let driver = MemoryDiskDriver::new();
        driver.inject_fault(DiskOp::Write, "/d/", FaultKind::OutOfSpace);

        let err = driver.write(Path::new("/d/a"), b"x").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(28));
    }

    #[test]
    fn test_clones_share_the_tree() {
        let driver = MemoryDiskDriver::new();
        let clone = driver.clone();

        clone.write(Path::new("/d/a"), b"shared").unwrap();
        assert_eq!(driver.read(Path::new("/d/a")).unwrap(), b"shared");
    }

    #[test]
    fn test_std_driver_roundtrip() {
        let temp = tempfile::TempDir::new().unwrap();
        let driver = StdDiskDriver::new();
        let dir = temp.path().join("downloads");
        driver.create_dir_all(&dir).unwrap();

        let path = dir.join("blob");
        driver.write(&path, b"bytes").unwrap();
        assert!(driver.exists(&path).unwrap());
        assert_eq!(driver.file_len(&path).unwrap(), 5);
        assert_eq!(driver.list(&dir).unwrap(), vec!["blob".to_string()]);

        driver.rename(&path, &dir.join("blob2")).unwrap();
        driver.delete(&dir.join("blob2")).unwrap();
        assert!(driver.list(&dir).unwrap().is_empty());
    }
}
