//! Fixed-layout header written at the start of every saved index.
//!
//! Layout (little-endian, 36 bytes):
//! `[magic: 8][version: u32][element type: u32][algorithm: u32][rows: u64][veclen: u64]`

use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::element::ElementType;
use crate::error::{NnError, Result};
use crate::params::Algorithm;

pub const MAGIC: [u8; 8] = *b"NNSEARCH";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 36;

/// Self-description of a saved index, readable without parsing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub element_type: ElementType,
    pub algorithm: Algorithm,
    /// Number of ids assigned, including removed points.
    pub rows: u64,
    pub veclen: u64,
}

impl IndexHeader {
    pub fn new(element_type: ElementType, algorithm: Algorithm, rows: usize, veclen: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            element_type,
            algorithm,
            rows: rows as u64,
            veclen: veclen as u64,
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.element_type.tag().to_le_bytes());
        buf[16..20].copy_from_slice(&self.algorithm.tag().to_le_bytes());
        buf[20..28].copy_from_slice(&self.rows.to_le_bytes());
        buf[28..36].copy_from_slice(&self.veclen.to_le_bytes());
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Read exactly `HEADER_LEN` bytes and validate them.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                NnError::CorruptIndex("file is shorter than the index header".to_string())
            }
            _ => NnError::Io(e),
        })?;

        if buf[0..8] != MAGIC {
            return Err(NnError::CorruptIndex("bad magic bytes".to_string()));
        }

        let version = u32::from_le_bytes(le4(&buf[8..12]));
        if version == 0 || version > FORMAT_VERSION {
            return Err(NnError::CorruptIndex(format!(
                "unsupported format version {}",
                version
            )));
        }

        let element_tag = u32::from_le_bytes(le4(&buf[12..16]));
        let element_type = ElementType::from_tag(element_tag).ok_or_else(|| {
            NnError::CorruptIndex(format!("unknown element type tag {}", element_tag))
        })?;
        let algorithm = Algorithm::from_tag(u32::from_le_bytes(le4(&buf[16..20])));
        if algorithm == Algorithm::Saved {
            return Err(NnError::CorruptIndex(
                "header names the saved pseudo-algorithm".to_string(),
            ));
        }

        Ok(Self {
            version,
            element_type,
            algorithm,
            rows: u64::from_le_bytes(le8(&buf[20..28])),
            veclen: u64::from_le_bytes(le8(&buf[28..36])),
        })
    }

    /// Read only the header of the index file at `path`.
    pub fn peek(path: impl AsRef<Path>) -> Result<Self> {
        let file = super::open_index_file(path.as_ref())?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let header = IndexHeader::new(ElementType::Float32, Algorithm::KdTree, 100, 8);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[0..8], b"NNSEARCH");
        assert_eq!(u32::from_le_bytes(le4(&buf[12..16])), 8);
        assert_eq!(u32::from_le_bytes(le4(&buf[16..20])), 1);

        let decoded = IndexHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_does_not_consume_payload() {
        let header = IndexHeader::new(ElementType::UInt8, Algorithm::Linear, 3, 2);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.extend_from_slice(b"payload");

        let mut cursor = Cursor::new(&buf);
        IndexHeader::read_from(&mut cursor).unwrap();
        assert_eq!(cursor.position() as usize, HEADER_LEN);
    }

    #[test]
    fn test_bad_magic() {
        let buf = vec![0u8; HEADER_LEN];
        assert!(matches!(
            IndexHeader::read_from(&mut Cursor::new(&buf)),
            Err(NnError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            IndexHeader::read_from(&mut Cursor::new(b"NNSE")),
            Err(NnError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_unknown_element_tag() {
        let header = IndexHeader::new(ElementType::Float32, Algorithm::Linear, 0, 0);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf[12..16].copy_from_slice(&42u32.to_le_bytes());
        assert!(matches!(
            IndexHeader::read_from(&mut Cursor::new(&buf)),
            Err(NnError::CorruptIndex(_))
        ));
    }
}
