//! Shared on-disk header framing used by every `.bin` file in a database
//! directory: a 4-byte magic, a `u32` format version, little-endian
//! throughout. Each store validates its own magic on open and fails with
//! `ErrorKind::ParseError` rather than panicking on a version mismatch.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const FORMAT_VERSION: u32 = 1;

pub const VECTORS_MAGIC: [u8; 4] = *b"VDBV";
pub const METADATA_MAGIC: [u8; 4] = *b"VDBM";
pub const HNSW_MAGIC: [u8; 4] = *b"VDBH";
pub const BM25_MAGIC: [u8; 4] = *b"VDBB";
pub const PQ_MAGIC: [u8; 4] = *b"VDBP";
pub const SQ_MAGIC: [u8; 4] = *b"VDBS";

/// Write `magic` + `FORMAT_VERSION` as the file preamble.
pub fn write_header<W: Write>(writer: &mut W, magic: [u8; 4]) -> Result<()> {
    writer.write_all(&magic)?;
    writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    Ok(())
}

/// Read and validate the preamble, returning the format version found.
/// Fails with `ParseError` on magic mismatch; a version newer than this
/// build's `FORMAT_VERSION` also fails closed rather than guessing layout.
pub fn read_header<R: Read>(reader: &mut R, expected_magic: [u8; 4]) -> Result<u32> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != expected_magic {
        return Err(Error::parse(format!(
            "bad magic bytes: expected {:?}, found {:?}",
            expected_magic, magic
        )));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version > FORMAT_VERSION {
        return Err(Error::parse(format!(
            "unsupported format version {version}, this build supports up to {FORMAT_VERSION}"
        )));
    }
    Ok(version)
}

/// CRC32 of `data`, appended as a trailing footer on snapshot bodies large
/// enough that silent bit rot is worth catching (the JSON-encoded HNSW
/// graph and BM25 postings bodies).
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Append `checksum(body)` as a little-endian `u32` footer.
pub fn write_checksummed_body<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    writer.write_all(body)?;
    writer.write_u32::<LittleEndian>(checksum(body))?;
    Ok(())
}

/// Split off and verify the trailing checksum footer, returning the body.
/// Fails with `ParseError` if the footer is missing or does not match.
pub fn read_checksummed_body(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 4 {
        return Err(Error::parse("truncated body: missing checksum footer"));
    }
    let (body, footer) = bytes.split_at(bytes.len() - 4);
    let expected = (&mut &footer[..]).read_u32::<LittleEndian>()?;
    let actual = checksum(body);
    if actual != expected {
        return Err(Error::parse(format!("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf, VECTORS_MAGIC).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let version = read_header(&mut cursor, VECTORS_MAGIC).unwrap();
        assert_eq!(version, FORMAT_VERSION);
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut buf = Vec::new();
        write_header(&mut buf, VECTORS_MAGIC).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_header(&mut cursor, METADATA_MAGIC).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseError);
    }

    #[test]
    fn checksummed_body_roundtrips() {
        let mut buf = Vec::new();
        write_checksummed_body(&mut buf, b"hello world").unwrap();
        let body = read_checksummed_body(&buf).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut buf = Vec::new();
        write_checksummed_body(&mut buf, b"hello world").unwrap();
        let last = buf.len() - 5;
        buf[last] ^= 0xff;
        let err = read_checksummed_body(&buf).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseError);
    }
}
