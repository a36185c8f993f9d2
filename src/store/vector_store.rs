//! Contiguous `f32` vectors indexed by a stable `id` on a memory-mapped file.
//!
//! Layout: `[magic(4) | version(u32) | dim(u32) | count(u64) | capacity(u64)
//! | reserved(32)]` followed by `capacity * dim * 4` bytes of row-major
//! `f32`, followed by a `ceil(capacity / 8)`-byte tombstone bitmap.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::mmap::MmapFile;
use crate::persistence::{self, VECTORS_MAGIC};

const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8 + 32;

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

fn region_len(dimension: usize, capacity: usize) -> usize {
    HEADER_LEN + dimension * capacity * 4 + bitmap_bytes(capacity)
}

/// Append-mostly, mmap-backed store of `f32` vectors.
pub struct VectorStore {
    path: PathBuf,
    mmap: MmapFile,
    dimension: usize,
    count: u64,
    capacity: u64,
}

impl VectorStore {
    /// Create a new store file at `path` for vectors of `dimension`,
    /// pre-sized for `initial_capacity` vectors.
    pub fn create(path: &Path, dimension: usize, initial_capacity: usize) -> Result<Self> {
        let initial_capacity = initial_capacity.max(1);
        let len = region_len(dimension, initial_capacity);
        let mut mmap = MmapFile::open_write(path, len)?;
        {
            let mut header = &mut mmap.as_mut_slice()[..HEADER_LEN];
            header.write_all(&VECTORS_MAGIC)?;
            header.write_u32::<LittleEndian>(persistence::FORMAT_VERSION)?;
            header.write_u32::<LittleEndian>(dimension as u32)?;
            header.write_u64::<LittleEndian>(0)?;
            header.write_u64::<LittleEndian>(initial_capacity as u64)?;
        }
        mmap.sync()?;
        Ok(Self { path: path.to_path_buf(), mmap, dimension, count: 0, capacity: initial_capacity as u64 })
    }

    /// Open an existing store file, validating its header.
    pub fn open(path: &Path) -> Result<Self> {
        let mmap = MmapFile::open_read(path)?;
        let mut cursor = mmap.as_slice();
        persistence::read_header(&mut cursor, VECTORS_MAGIC)?;
        let dimension = cursor.read_u32::<LittleEndian>()? as usize;
        let count = cursor.read_u64::<LittleEndian>()?;
        let capacity = cursor.read_u64::<LittleEndian>()?;
        Ok(Self { path: path.to_path_buf(), mmap, dimension, count, capacity })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn write_count(&mut self) -> Result<()> {
        let mut slice = &mut self.mmap.as_mut_slice()[8..16];
        slice.write_u64::<LittleEndian>(self.count)?;
        Ok(())
    }

    fn offset_of(&self, idx: u64) -> usize {
        HEADER_LEN + (idx as usize) * self.dimension * 4
    }

    fn bitmap_offset(&self) -> usize {
        HEADER_LEN + (self.capacity as usize) * self.dimension * 4
    }

    fn ensure_capacity(&mut self, needed: u64) -> Result<()> {
        if needed <= self.capacity {
            return Ok(());
        }
        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        let new_len = region_len(self.dimension, new_capacity as usize);
        self.mmap.resize(new_len)?;
        // Tombstone bitmap has moved; rebuild it at the new offset. Copy the
        // live bits from the old offset (derivable from the capacity field
        // still present at the time of this call) before overwriting.
        let old_bitmap_offset = self.bitmap_offset();
        let old_bitmap_len = bitmap_bytes(self.capacity as usize);
        let old_bitmap: Vec<u8> = self.mmap.as_slice()[old_bitmap_offset..old_bitmap_offset + old_bitmap_len].to_vec();
        self.capacity = new_capacity;
        let mut header = &mut self.mmap.as_mut_slice()[16..24];
        header.write_u64::<LittleEndian>(new_capacity)?;
        let new_bitmap_offset = self.bitmap_offset();
        let new_bitmap_len = bitmap_bytes(new_capacity as usize);
        let dst = &mut self.mmap.as_mut_slice()[new_bitmap_offset..new_bitmap_offset + new_bitmap_len];
        dst[..old_bitmap_len.min(new_bitmap_len)].copy_from_slice(&old_bitmap[..old_bitmap_len.min(new_bitmap_len)]);
        Ok(())
    }

    /// Append a vector, returning its sequential slot index (the caller
    /// maps this to a stable database `id`).
    pub fn append(&mut self, vector: &[f32]) -> Result<u64> {
        if vector.len() != self.dimension {
            return Err(Error::invalid_input(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let idx = self.count;
        self.ensure_capacity(idx + 1)?;
        let offset = self.offset_of(idx);
        let bytes: &[u8] = bytemuck::cast_slice(vector);
        self.mmap.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.count += 1;
        self.write_count()?;
        Ok(idx)
    }

    /// Zero-copy view of the vector at `idx`. Returns `NotFound` for an
    /// out-of-range or tombstoned slot.
    pub fn get(&self, idx: u64) -> Result<&[f32]> {
        if idx >= self.count || self.is_deleted(idx) {
            return Err(Error::not_found(format!("no vector at slot {idx}")));
        }
        let offset = self.offset_of(idx);
        let bytes = &self.mmap.as_slice()[offset..offset + self.dimension * 4];
        Ok(bytemuck::cast_slice(bytes))
    }

    /// Returns the raw slot contents regardless of tombstone state (used by
    /// `compact`).
    pub fn get_raw(&self, idx: u64) -> &[f32] {
        let offset = self.offset_of(idx);
        bytemuck::cast_slice(&self.mmap.as_slice()[offset..offset + self.dimension * 4])
    }

    pub fn is_deleted(&self, idx: u64) -> bool {
        let bitmap_offset = self.bitmap_offset();
        let byte = self.mmap.as_slice()[bitmap_offset + (idx as usize) / 8];
        (byte >> (idx % 8)) & 1 == 1
    }

    pub fn mark_deleted(&mut self, idx: u64) -> Result<()> {
        if idx >= self.count {
            return Err(Error::not_found(format!("no vector at slot {idx}")));
        }
        let bitmap_offset = self.bitmap_offset();
        let byte_idx = bitmap_offset + (idx as usize) / 8;
        let bit = 1u8 << (idx % 8);
        self.mmap.as_mut_slice()[byte_idx] |= bit;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.sync()
    }

    /// Rewrite the store dense (dropping tombstoned slots), returning a
    /// translation table `old_idx -> Some(new_idx)` (or `None` if dropped).
    pub fn compact(&mut self) -> Result<Vec<Option<u64>>> {
        let mut translation = vec![None; self.count as usize];
        let mut live: Vec<(u64, Vec<f32>)> = Vec::new();
        for idx in 0..self.count {
            if !self.is_deleted(idx) {
                live.push((idx, self.get_raw(idx).to_vec()));
            }
        }
        let dimension = self.dimension;
        let new_capacity = live.len().max(1);
        let tmp_path = self.path.with_extension("bin.compact");
        let mut fresh = VectorStore::create(&tmp_path, dimension, new_capacity)?;
        for (new_idx, (old_idx, vec)) in live.iter().enumerate() {
            let assigned = fresh.append(vec)?;
            debug_assert_eq!(assigned, new_idx as u64);
            translation[*old_idx as usize] = Some(new_idx as u64);
        }
        fresh.sync()?;
        drop(fresh);
        std::fs::rename(&tmp_path, &self.path)?;
        *self = VectorStore::open(&self.path)?;
        Ok(translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let mut store = VectorStore::create(&path, 4, 2).unwrap();
        let id0 = store.append(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let id1 = store.append(&[5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
        assert_eq!(store.get(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.get(1).unwrap(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let mut store = VectorStore::create(&path, 2, 1).unwrap();
        for i in 0..10 {
            let id = store.append(&[i as f32, i as f32]).unwrap();
            assert_eq!(id, i);
        }
        assert_eq!(store.count(), 10);
        assert_eq!(store.get(7).unwrap(), &[7.0, 7.0]);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let mut store = VectorStore::create(&path, 4, 1).unwrap();
        let err = store.append(&[1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn mark_deleted_then_compact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let mut store = VectorStore::create(&path, 2, 4).unwrap();
        store.append(&[1.0, 1.0]).unwrap();
        store.append(&[2.0, 2.0]).unwrap();
        store.append(&[3.0, 3.0]).unwrap();
        store.mark_deleted(1).unwrap();
        let translation = store.compact().unwrap();
        assert_eq!(translation[0], Some(0));
        assert_eq!(translation[1], None);
        assert_eq!(translation[2], Some(1));
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(0).unwrap(), &[1.0, 1.0]);
        assert_eq!(store.get(1).unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        {
            let mut store = VectorStore::create(&path, 3, 2).unwrap();
            store.append(&[1.0, 2.0, 3.0]).unwrap();
            store.sync().unwrap();
        }
        let store = VectorStore::open(&path).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(0).unwrap(), &[1.0, 2.0, 3.0]);
    }
}
