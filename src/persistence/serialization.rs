//! Serialization utilities: checksummed bincode blocks for backend payloads.
//!
//! Each block is written as: `[length: u64][crc32: u32][payload: bincode]`.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NnError, Result};

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| NnError::Serialization(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| NnError::Serialization(e.to_string()))
}

/// Write `value` as a length-prefixed, checksummed block.
pub fn write_block<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = to_bincode(value)?;
    let crc = crc32fast::hash(&payload);

    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read a block written by [`write_block`], verifying its checksum.
pub fn read_block<R, T>(reader: &mut R) -> Result<T>
where
    R: Read + ?Sized,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 8];
    read_exact_or_corrupt(reader, &mut len_buf, "payload length")?;
    let len = u64::from_le_bytes(len_buf);

    let mut crc_buf = [0u8; 4];
    read_exact_or_corrupt(reader, &mut crc_buf, "payload checksum")?;
    let stored_crc = u32::from_le_bytes(crc_buf);

    // Read through `take` so a corrupted length cannot trigger a huge allocation.
    let mut payload = Vec::new();
    reader.take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(NnError::CorruptIndex(format!(
            "payload truncated: expected {} bytes, found {}",
            len,
            payload.len()
        )));
    }

    if crc32fast::hash(&payload) != stored_crc {
        return Err(NnError::CorruptIndex("payload checksum mismatch".to_string()));
    }

    from_bincode(&payload)
}

fn read_exact_or_corrupt<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => NnError::CorruptIndex(format!("missing {}", what)),
        _ => NnError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: usize,
        data: Vec<f32>,
    }

    #[test]
    fn test_block_roundtrip() {
        let sample = Sample {
            id: 42,
            data: vec![1.0, 2.0, 3.0],
        };
        let mut buf = Vec::new();
        write_block(&mut buf, &sample).unwrap();

        let decoded: Sample = read_block(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_block_checksum_mismatch() {
        let mut buf = Vec::new();
        write_block(&mut buf, &vec![1u32, 2, 3]).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let result: Result<Vec<u32>> = read_block(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(NnError::CorruptIndex(_))));
    }

    #[test]
    fn test_block_truncated() {
        let mut buf = Vec::new();
        write_block(&mut buf, &vec![7u64; 16]).unwrap();
        buf.truncate(buf.len() - 5);

        let result: Result<Vec<u64>> = read_block(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(NnError::CorruptIndex(_))));
    }
}
