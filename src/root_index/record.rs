use crate::codec::ByteOrder;
use crate::error::{Error, Result};
use crate::types::{Timestamp, Version};

/// One committed version in the root log.
///
/// On-disk format (24 bytes, storage byte order):
/// ```text
/// ┌──────────────┬────────────────┬──────────────────┐
/// │ Version (8B) │ Timestamp (8B) │ Root offset (8B) │
/// └──────────────┴────────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootIndexRecord {
    pub version: Version,
    /// Epoch milliseconds at commit.
    pub timestamp: Timestamp,
    /// Byte offset of the version's root page.
    pub offset: u64,
}

impl RootIndexRecord {
    /// Size of a record in bytes (fixed).
    pub const SIZE: usize = 8 * 3;

    pub fn new(version: Version, timestamp: Timestamp, offset: u64) -> Self {
        RootIndexRecord {
            version,
            timestamp,
            offset,
        }
    }

    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        order.put_u64(&mut buf, self.version);
        order.put_u64(&mut buf, self.timestamp);
        order.put_u64(&mut buf, self.offset);
        buf
    }

    /// Decode exactly [`Self::SIZE`] bytes.
    pub fn decode(data: &[u8], order: ByteOrder) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::Bounds {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(RootIndexRecord {
            version: order.read_u64(&data[0..8])?,
            timestamp: order.read_u64(&data[8..16])?,
            offset: order.read_u64(&data[16..24])?,
        })
    }
}
