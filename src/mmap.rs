//! Cross-platform memory-mapped file primitive.
//!
//! Thin wrapper over `memmap2` that owns the backing `File` alongside the
//! mapping (a mapping must not outlive its file) and exposes the narrow
//! operation set the vector/metadata stores need: open for read, open for
//! write with a known initial size, grow, sync, and close.

use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::{Error, Result};

/// A growable, syncable memory-mapped file.
///
/// Views (`as_slice` / `as_mut_slice`) borrow from `self` and are therefore
/// bounded by the call that produced them — callers cannot hold a view
/// across a `resize`, which may remap the underlying pages.
pub struct MmapFile {
    file: File,
    mmap: MmapMut,
    len: usize,
}

impl MmapFile {
    /// Open an existing file read-write and map its current contents.
    pub fn open_read(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        // SAFETY: the file is exclusively owned by this `MmapFile` for its
        // lifetime; no other process is expected to mutate it concurrently
        // with growth (callers serialize writers at a higher layer).
        let mmap = unsafe { MmapOptions::new().len(len.max(1)).map_mut(&file)? };
        Ok(Self { file, mmap, len })
    }

    /// Create (or truncate) a file at `path` and map it at `initial_size` bytes.
    pub fn open_write(path: &Path, initial_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(initial_size as u64)?;
        // SAFETY: see `open_read`.
        let mmap = unsafe { MmapOptions::new().len(initial_size.max(1)).map_mut(&file)? };
        Ok(Self { file, mmap, len: initial_size })
    }

    /// Grow the backing file to `new_size` bytes and remap. No-op if
    /// `new_size <= self.len()`. Any previously returned slice views must
    /// not be used after this call.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size <= self.len {
            return Ok(());
        }
        self.file.set_len(new_size as u64)?;
        // SAFETY: the old mapping is dropped before the new one is created,
        // and the file now has at least `new_size` bytes backing it.
        self.mmap = unsafe { MmapOptions::new().len(new_size).map_mut(&self.file)? };
        self.len = new_size;
        Ok(())
    }

    /// Durably commit dirty pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().map_err(Error::from)
    }

    /// Current mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read-only view of the mapped region.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..self.len]
    }

    /// Mutable view of the mapped region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..self.len]
    }

    /// Release the mapping and file handle. Syncs first.
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_grow_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        {
            let mut f = MmapFile::open_write(&path, 16).unwrap();
            f.as_mut_slice()[0..4].copy_from_slice(&42u32.to_le_bytes());
            f.resize(32).unwrap();
            f.as_mut_slice()[16..20].copy_from_slice(&7u32.to_le_bytes());
            f.sync().unwrap();
        }
        let f = MmapFile::open_read(&path).unwrap();
        assert_eq!(f.len(), 32);
        assert_eq!(u32::from_le_bytes(f.as_slice()[0..4].try_into().unwrap()), 42);
        assert_eq!(u32::from_le_bytes(f.as_slice()[16..20].try_into().unwrap()), 7);
    }
}
