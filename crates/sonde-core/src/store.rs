//! Block store abstraction.
//!
//! The engine never opens files itself; all storage goes through
//! [`BlockStore`], a byte-range interface over named paths. The firmware
//! implements it on top of `embedded-sdmmc`; [`MemBlockStore`] backs host
//! tests and the desktop simulator.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;

/// Raw byte-range read/write on named files.
///
/// Paths use `/`-separated components relative to the storage root (e.g.
/// `/log/AABBCCDD/25/0807-0.bin`). Implementations are expected to be slow
/// to open files (milliseconds on SD); callers batch work accordingly.
///
/// Contract:
/// - `write_at` creates the file only when `offset == 0`; writing into an
///   absent file at a nonzero offset is an error. It may commit fewer bytes
///   than asked.
/// - `read_at` returns the bytes actually read; short at end of file.
/// - `file_len` returns `None` for an absent file and doubles as the
///   existence probe.
pub trait BlockStore {
    type Error: core::fmt::Debug;

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn write_at(&mut self, path: &str, offset: u32, data: &[u8]) -> Result<usize, Self::Error>;

    /// Replace the file's contents wholesale, creating it when absent.
    fn overwrite(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error>;

    fn file_len(&mut self, path: &str) -> Result<Option<u32>, Self::Error>;

    /// Create the final directory component when missing; parents must
    /// already exist.
    fn ensure_dir(&mut self, path: &str) -> Result<(), Self::Error>;

    fn remove(&mut self, path: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemStoreError {
    FileAbsent,
}

/// Alloc-backed in-memory store for host tests and the simulator.
///
/// `write_limit` caps the bytes committed by the next `write_at` call (then
/// clears itself), which lets tests exercise the engine's partial-write
/// handling.
#[derive(Debug, Default)]
pub struct MemBlockStore {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    pub write_limit: Option<usize>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl BlockStore for MemBlockStore {
    type Error = MemStoreError;

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let data = self.files.get(path).ok_or(MemStoreError::FileAbsent)?;
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, path: &str, offset: u32, data: &[u8]) -> Result<usize, Self::Error> {
        let offset = offset as usize;
        if offset != 0 && !self.files.contains_key(path) {
            return Err(MemStoreError::FileAbsent);
        }
        let n = match self.write_limit.take() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        let file = self.files.entry(String::from(path)).or_default();
        if file.len() < offset + n {
            file.resize(offset + n, 0);
        }
        file[offset..offset + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn overwrite(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.files.insert(String::from(path), Vec::from(data));
        Ok(())
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u32>, Self::Error> {
        Ok(self.files.get(path).map(|f| f.len() as u32))
    }

    fn ensure_dir(&mut self, path: &str) -> Result<(), Self::Error> {
        self.dirs.insert(String::from(path));
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or(MemStoreError::FileAbsent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_back() {
        let mut store = MemBlockStore::new();
        store.write_at("/a.bin", 0, b"hello").unwrap();
        let mut buf = [0u8; 8];
        let n = store.read_at("/a.bin", 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_nonzero_offset_requires_existing_file() {
        let mut store = MemBlockStore::new();
        assert_eq!(
            store.write_at("/a.bin", 4, b"x"),
            Err(MemStoreError::FileAbsent)
        );
        store.write_at("/a.bin", 0, b"1234").unwrap();
        assert_eq!(store.write_at("/a.bin", 4, b"x"), Ok(1));
        assert_eq!(store.file_len("/a.bin").unwrap(), Some(5));
    }

    #[test]
    fn test_write_limit_truncates() {
        let mut store = MemBlockStore::new();
        store.write_limit = Some(3);
        assert_eq!(store.write_at("/a.bin", 0, b"hello").unwrap(), 3);
        assert_eq!(store.file_len("/a.bin").unwrap(), Some(3));
    }

    #[test]
    fn test_remove_absent() {
        let mut store = MemBlockStore::new();
        assert_eq!(store.remove("/a.bin"), Err(MemStoreError::FileAbsent));
    }
}
