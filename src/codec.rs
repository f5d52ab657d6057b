use bytes::BufMut;

use crate::error::{Error, Result};

/// Byte order used for every fixed-width integer a storage writes.
///
/// Chosen once when the storage is created; records and pages written by one
/// storage are only readable with the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn put_u16<B: BufMut>(self, buf: &mut B, v: u16) {
        match self {
            ByteOrder::LittleEndian => buf.put_u16_le(v),
            ByteOrder::BigEndian => buf.put_u16(v),
        }
    }

    pub fn put_u32<B: BufMut>(self, buf: &mut B, v: u32) {
        match self {
            ByteOrder::LittleEndian => buf.put_u32_le(v),
            ByteOrder::BigEndian => buf.put_u32(v),
        }
    }

    pub fn put_u64<B: BufMut>(self, buf: &mut B, v: u64) {
        match self {
            ByteOrder::LittleEndian => buf.put_u64_le(v),
            ByteOrder::BigEndian => buf.put_u64(v),
        }
    }

    /// Decode exactly two bytes.
    pub fn read_u16(self, data: &[u8]) -> Result<u16> {
        let raw: [u8; 2] = exact(data)?;
        Ok(match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        })
    }

    /// Decode exactly four bytes.
    pub fn read_u32(self, data: &[u8]) -> Result<u32> {
        let raw: [u8; 4] = exact(data)?;
        Ok(match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        })
    }

    /// Decode exactly eight bytes. Anything else is a [`Error::Bounds`].
    pub fn read_u64(self, data: &[u8]) -> Result<u64> {
        let raw: [u8; 8] = exact(data)?;
        Ok(match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        })
    }
}

fn exact<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.try_into().map_err(|_| Error::Bounds {
        expected: N,
        actual: data.len(),
    })
}
