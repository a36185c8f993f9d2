//! Metadata records on a fixed-record file plus a companion string heap.
//!
//! `metadata.bin` holds one fixed-size record per id: the closed
//! `DocumentType` tag, a deleted flag, and `(offset, len)` pairs into
//! `metadata.bin.strs` for each variable-length field. `update` appends the
//! new bytes to the heap and leaves the old bytes as garbage until the next
//! `compact`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::metadata::{DocumentType, Metadata};
use crate::mmap::MmapFile;
use crate::persistence::{self, METADATA_MAGIC};

const RECORD_HEADER_LEN: usize = 16;
const RECORD_LEN: usize = 64;
const HEAP_HEADER_LEN: usize = 16;

const HEAP_MAGIC: [u8; 4] = *b"VDBX";

#[derive(Debug, Clone, Copy, Default)]
struct Slice {
    offset: u64,
    len: u32,
}

impl Slice {
    const EMPTY: Slice = Slice { offset: 0, len: 0 };

    fn read(cursor: &mut &[u8]) -> Result<Self> {
        let offset = cursor.read_u64::<LittleEndian>()?;
        let len = cursor.read_u32::<LittleEndian>()?;
        Ok(Self { offset, len })
    }

    fn write<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(self.len)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Record {
    document_type: DocumentType,
    deleted: bool,
    date: Slice,
    asset: Slice,
    bias: Slice,
    source_path: Slice,
    extra: Slice,
}

impl Record {
    fn empty() -> Self {
        Self {
            document_type: DocumentType::Unknown,
            deleted: false,
            date: Slice::EMPTY,
            asset: Slice::EMPTY,
            bias: Slice::EMPTY,
            source_path: Slice::EMPTY,
            extra: Slice::EMPTY,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let tag = cursor.read_u8()?;
        let deleted = cursor.read_u8()? != 0;
        let _pad = cursor.read_u16::<LittleEndian>()?;
        let document_type = document_type_from_tag(tag)?;
        let date = Slice::read(&mut cursor)?;
        let asset = Slice::read(&mut cursor)?;
        let bias = Slice::read(&mut cursor)?;
        let source_path = Slice::read(&mut cursor)?;
        let extra = Slice::read(&mut cursor)?;
        Ok(Self { document_type, deleted, date, asset, bias, source_path, extra })
    }

    fn encode(&self, out: &mut [u8]) -> Result<()> {
        let mut w = &mut out[..RECORD_LEN];
        w.write_u8(document_type_tag(self.document_type))?;
        w.write_u8(self.deleted as u8)?;
        w.write_u16::<LittleEndian>(0)?;
        self.date.write(&mut w)?;
        self.asset.write(&mut w)?;
        self.bias.write(&mut w)?;
        self.source_path.write(&mut w)?;
        self.extra.write(&mut w)?;
        Ok(())
    }
}

fn document_type_tag(t: DocumentType) -> u8 {
    match t {
        DocumentType::Journal => 0,
        DocumentType::Chart => 1,
        DocumentType::ReportAnnual => 2,
        DocumentType::ReportQuarterly => 3,
        DocumentType::PreMarket => 4,
        DocumentType::Unknown => 5,
    }
}

fn document_type_from_tag(tag: u8) -> Result<DocumentType> {
    Ok(match tag {
        0 => DocumentType::Journal,
        1 => DocumentType::Chart,
        2 => DocumentType::ReportAnnual,
        3 => DocumentType::ReportQuarterly,
        4 => DocumentType::PreMarket,
        5 => DocumentType::Unknown,
        other => return Err(Error::parse(format!("unknown document type tag {other}"))),
    })
}

/// Overflow serialized as JSON into the heap's `extra` slice.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Extra {
    numeric_fields: std::collections::HashMap<String, f64>,
    custom: std::collections::HashMap<String, String>,
}

struct Heap {
    path: PathBuf,
    mmap: MmapFile,
    len: u64,
}

impl Heap {
    fn create(path: &Path) -> Result<Self> {
        let mut mmap = MmapFile::open_write(path, HEAP_HEADER_LEN)?;
        {
            let mut header = &mut mmap.as_mut_slice()[..HEAP_HEADER_LEN];
            header.write_all(&HEAP_MAGIC)?;
            header.write_u32::<LittleEndian>(persistence::FORMAT_VERSION)?;
            header.write_u64::<LittleEndian>(0)?;
        }
        mmap.sync()?;
        Ok(Self { path: path.to_path_buf(), mmap, len: 0 })
    }

    fn open(path: &Path) -> Result<Self> {
        let mmap = MmapFile::open_read(path)?;
        let mut cursor = mmap.as_slice();
        persistence::read_header(&mut cursor, HEAP_MAGIC)?;
        let len = cursor.read_u64::<LittleEndian>()?;
        Ok(Self { path: path.to_path_buf(), mmap, len })
    }

    fn write_len(&mut self) -> Result<()> {
        let mut slice = &mut self.mmap.as_mut_slice()[8..16];
        slice.write_u64::<LittleEndian>(self.len)?;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<Slice> {
        if bytes.is_empty() {
            return Ok(Slice::EMPTY);
        }
        let needed = HEAP_HEADER_LEN as u64 + self.len + bytes.len() as u64;
        if needed > self.mmap.len() as u64 {
            let mut new_len = self.mmap.len().max(HEAP_HEADER_LEN + 1);
            while (new_len as u64) < needed {
                new_len *= 2;
            }
            self.mmap.resize(new_len)?;
        }
        let offset = self.len;
        let start = HEAP_HEADER_LEN + offset as usize;
        self.mmap.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len() as u64;
        self.write_len()?;
        Ok(Slice { offset, len: bytes.len() as u32 })
    }

    fn read(&self, slice: Slice) -> &[u8] {
        if slice.len == 0 {
            return &[];
        }
        let start = HEAP_HEADER_LEN + slice.offset as usize;
        &self.mmap.as_slice()[start..start + slice.len as usize]
    }

    fn sync(&self) -> Result<()> {
        self.mmap.sync()
    }
}

/// Fixed-record metadata store backed by `metadata.bin` and `metadata.bin.strs`.
pub struct MetadataStore {
    records_path: PathBuf,
    records: MmapFile,
    heap: Heap,
    count: u64,
    capacity: u64,
}

fn records_region_len(capacity: u64) -> usize {
    RECORD_HEADER_LEN + (capacity as usize) * RECORD_LEN
}

fn heap_path_for(records_path: &Path) -> PathBuf {
    let mut p = records_path.as_os_str().to_owned();
    p.push(".strs");
    PathBuf::from(p)
}

impl MetadataStore {
    pub fn create(path: &Path, initial_capacity: usize) -> Result<Self> {
        let initial_capacity = (initial_capacity.max(1)) as u64;
        let mut records = MmapFile::open_write(path, records_region_len(initial_capacity))?;
        {
            let mut header = &mut records.as_mut_slice()[..RECORD_HEADER_LEN];
            header.write_all(&METADATA_MAGIC)?;
            header.write_u32::<LittleEndian>(persistence::FORMAT_VERSION)?;
            header.write_u64::<LittleEndian>(0)?;
        }
        records.sync()?;
        let heap = Heap::create(&heap_path_for(path))?;
        Ok(Self { records_path: path.to_path_buf(), records, heap, count: 0, capacity: initial_capacity })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let records = MmapFile::open_read(path)?;
        let mut cursor = records.as_slice();
        persistence::read_header(&mut cursor, METADATA_MAGIC)?;
        let count = cursor.read_u64::<LittleEndian>()?;
        let capacity = ((records.len() - RECORD_HEADER_LEN) / RECORD_LEN) as u64;
        let heap = Heap::open(&heap_path_for(path))?;
        Ok(Self { records_path: path.to_path_buf(), records, heap, count, capacity })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn write_count(&mut self) -> Result<()> {
        let mut slice = &mut self.records.as_mut_slice()[8..16];
        slice.write_u64::<LittleEndian>(self.count)?;
        Ok(())
    }

    fn record_offset(idx: u64) -> usize {
        RECORD_HEADER_LEN + (idx as usize) * RECORD_LEN
    }

    fn ensure_capacity(&mut self, needed: u64) -> Result<()> {
        if needed <= self.capacity {
            return Ok(());
        }
        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        self.records.resize(records_region_len(new_capacity))?;
        self.capacity = new_capacity;
        Ok(())
    }

    fn encode_extra(metadata: &Metadata) -> Vec<u8> {
        if metadata.numeric_fields.is_empty() && metadata.custom.is_empty() {
            return Vec::new();
        }
        let extra = Extra { numeric_fields: metadata.numeric_fields.clone(), custom: metadata.custom.clone() };
        serde_json::to_vec(&extra).unwrap_or_default()
    }

    fn record_from_metadata(&mut self, metadata: &Metadata) -> Result<Record> {
        let date = self.heap.append(metadata.date.as_deref().unwrap_or("").as_bytes())?;
        let asset = self.heap.append(metadata.asset.as_deref().unwrap_or("").as_bytes())?;
        let bias = self.heap.append(metadata.bias.as_deref().unwrap_or("").as_bytes())?;
        let source_path = self.heap.append(metadata.source_path.as_deref().unwrap_or("").as_bytes())?;
        let extra_bytes = Self::encode_extra(metadata);
        let extra = self.heap.append(&extra_bytes)?;
        Ok(Record { document_type: metadata.document_type, deleted: false, date, asset, bias, source_path, extra })
    }

    /// Append a metadata record, returning its slot index.
    pub fn append(&mut self, metadata: &Metadata) -> Result<u64> {
        let record = self.record_from_metadata(metadata)?;
        let idx = self.count;
        self.ensure_capacity(idx + 1)?;
        let offset = Self::record_offset(idx);
        record.encode(&mut self.records.as_mut_slice()[offset..offset + RECORD_LEN])?;
        self.count += 1;
        self.write_count()?;
        Ok(idx)
    }

    fn decode_record(&self, idx: u64) -> Result<Record> {
        let offset = Self::record_offset(idx);
        Record::decode(&self.records.as_slice()[offset..offset + RECORD_LEN])
    }

    fn materialize(&self, record: Record) -> Metadata {
        let string_of = |s: Slice| -> Option<String> {
            if s.len == 0 {
                None
            } else {
                Some(String::from_utf8_lossy(self.heap.read(s)).into_owned())
            }
        };
        let extra: Extra = if record.extra.len == 0 {
            Extra::default()
        } else {
            serde_json::from_slice(self.heap.read(record.extra)).unwrap_or_default()
        };
        Metadata {
            date: string_of(record.date),
            document_type: record.document_type,
            source_path: string_of(record.source_path),
            asset: string_of(record.asset),
            bias: string_of(record.bias),
            numeric_fields: extra.numeric_fields,
            custom: extra.custom,
        }
    }

    pub fn get(&self, idx: u64) -> Result<Metadata> {
        if idx >= self.count {
            return Err(Error::not_found(format!("no metadata at slot {idx}")));
        }
        let record = self.decode_record(idx)?;
        if record.deleted {
            return Err(Error::not_found(format!("no metadata at slot {idx}")));
        }
        Ok(self.materialize(record))
    }

    pub fn is_deleted(&self, idx: u64) -> Result<bool> {
        Ok(self.decode_record(idx)?.deleted)
    }

    pub fn update(&mut self, idx: u64, metadata: &Metadata) -> Result<()> {
        if idx >= self.count {
            return Err(Error::not_found(format!("no metadata at slot {idx}")));
        }
        let record = self.record_from_metadata(metadata)?;
        let offset = Self::record_offset(idx);
        record.encode(&mut self.records.as_mut_slice()[offset..offset + RECORD_LEN])?;
        Ok(())
    }

    pub fn mark_deleted(&mut self, idx: u64) -> Result<()> {
        if idx >= self.count {
            return Err(Error::not_found(format!("no metadata at slot {idx}")));
        }
        let mut record = self.decode_record(idx)?;
        record.deleted = true;
        let offset = Self::record_offset(idx);
        record.encode(&mut self.records.as_mut_slice()[offset..offset + RECORD_LEN])?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.records.sync()?;
        self.heap.sync()
    }

    /// Rewrite both files dense, dropping tombstoned slots and compacting
    /// the heap. Returns `old_idx -> Some(new_idx)` (or `None` if dropped).
    pub fn compact(&mut self) -> Result<Vec<Option<u64>>> {
        let mut translation = vec![None; self.count as usize];
        let mut live = Vec::new();
        for idx in 0..self.count {
            let record = self.decode_record(idx)?;
            if !record.deleted {
                live.push((idx, self.materialize(record)));
            }
        }
        let new_capacity = live.len().max(1);
        let tmp_path = self.records_path.with_extension("bin.compact");
        let mut fresh = MetadataStore::create(&tmp_path, new_capacity)?;
        for (new_idx, (old_idx, metadata)) in live.iter().enumerate() {
            let assigned = fresh.append(metadata)?;
            debug_assert_eq!(assigned, new_idx as u64);
            translation[*old_idx as usize] = Some(new_idx as u64);
        }
        fresh.sync()?;
        drop(fresh);
        let tmp_heap = heap_path_for(&tmp_path);
        let heap_path = heap_path_for(&self.records_path);
        std::fs::rename(&tmp_path, &self.records_path)?;
        std::fs::rename(&tmp_heap, &heap_path)?;
        *self = MetadataStore::open(&self.records_path)?;
        Ok(translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_get_roundtrips_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.bin");
        let mut store = MetadataStore::create(&path, 2).unwrap();
        let mut metadata = Metadata::new().with_document_type(DocumentType::Chart).with_asset("SPY").with_date("2026-08-01");
        metadata.numeric_fields.insert("price".into(), 512.3);
        metadata.custom.insert("source".into(), "desk".into());
        let idx = store.append(&metadata).unwrap();
        let back = store.get(idx).unwrap();
        assert_eq!(back.document_type, DocumentType::Chart);
        assert_eq!(back.asset.as_deref(), Some("SPY"));
        assert_eq!(back.date.as_deref(), Some("2026-08-01"));
        assert_eq!(back.numeric_fields.get("price"), Some(&512.3));
        assert_eq!(back.custom.get("source"), Some(&"desk".to_string()));
    }

    #[test]
    fn update_overwrites_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.bin");
        let mut store = MetadataStore::create(&path, 2).unwrap();
        let idx = store.append(&Metadata::new().with_asset("SPY")).unwrap();
        store.update(idx, &Metadata::new().with_asset("QQQ")).unwrap();
        assert_eq!(store.get(idx).unwrap().asset.as_deref(), Some("QQQ"));
    }

    #[test]
    fn mark_deleted_then_compact_remaps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.bin");
        let mut store = MetadataStore::create(&path, 4).unwrap();
        let a = store.append(&Metadata::new().with_asset("A")).unwrap();
        let b = store.append(&Metadata::new().with_asset("B")).unwrap();
        let c = store.append(&Metadata::new().with_asset("C")).unwrap();
        store.mark_deleted(b).unwrap();
        let translation = store.compact().unwrap();
        assert_eq!(translation[a as usize], Some(0));
        assert_eq!(translation[b as usize], None);
        assert_eq!(translation[c as usize], Some(1));
        assert_eq!(store.get(0).unwrap().asset.as_deref(), Some("A"));
        assert_eq!(store.get(1).unwrap().asset.as_deref(), Some("C"));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.bin");
        let mut store = MetadataStore::create(&path, 1).unwrap();
        for i in 0..20 {
            let idx = store.append(&Metadata::new().with_asset(format!("A{i}"))).unwrap();
            assert_eq!(idx, i);
        }
        assert_eq!(store.count(), 20);
        assert_eq!(store.get(15).unwrap().asset.as_deref(), Some("A15"));
    }
}
