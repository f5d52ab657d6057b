use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::codec::ByteOrder;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::storage::Storage;
use crate::types::{INITIAL_VERSION, Version};

/// Volatile storage backed by a map of appended segments.
///
/// Every `append` becomes one immutable `Bytes` segment keyed by its start
/// offset, so reads that stay inside one segment are zero-copy slices. Used
/// by tests and for ephemeral trees; nothing survives the process.
pub struct MemoryStorage {
    page_size: usize,
    byte_order: ByteOrder,
    inner: RwLock<Inner>,
}

struct Inner {
    segments: BTreeMap<u64, Bytes>,
    cursor: u64,
    last_persisted: Option<u64>,
    version: Version,
    closed: bool,
}

impl MemoryStorage {
    pub fn new(options: &Options) -> Result<Self> {
        options.validate()?;
        Ok(MemoryStorage {
            page_size: options.page_size,
            byte_order: options.byte_order,
            inner: RwLock::new(Inner {
                segments: BTreeMap::new(),
                cursor: 0,
                last_persisted: None,
                version: INITIAL_VERSION,
                closed: false,
            }),
        })
    }

    /// Number of appended segments.
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }
}

impl Inner {
    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let end = offset.checked_add(len as u64).ok_or(Error::Eof)?;
        if end > self.cursor {
            return Err(Error::Eof);
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let (&start, segment) = self
            .segments
            .range(..=offset)
            .next_back()
            .ok_or(Error::Eof)?;
        let local = (offset - start) as usize;

        // Common case: the whole range lives in one segment.
        if local + len <= segment.len() {
            return Ok(segment.slice(local..local + len));
        }

        let mut out = BytesMut::with_capacity(len);
        for (&seg_start, seg) in self.segments.range(start..) {
            if seg_start >= end {
                break;
            }
            let from = offset.saturating_sub(seg_start) as usize;
            let to = ((end - seg_start) as usize).min(seg.len());
            out.extend_from_slice(&seg[from..to]);
        }
        Ok(out.freeze())
    }
}

impl Storage for MemoryStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }
        let offset = inner.cursor;
        if !data.is_empty() {
            inner.segments.insert(offset, Bytes::copy_from_slice(data));
        }
        inner.cursor += data.len() as u64;
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.read(offset, len)
    }

    /// Bind to the segment appended at `page_number * page_size`. When no
    /// segment starts there, the page number itself is used as a raw byte
    /// address into the appended data.
    fn map_page(&self, page_number: u64) -> Result<Bytes> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(Error::Closed);
        }
        let offset = page_number
            .checked_mul(self.page_size as u64)
            .ok_or(Error::Eof)?;
        if inner.segments.contains_key(&offset) {
            inner.read(offset, self.page_size)
        } else {
            inner.read(page_number, self.page_size)
        }
    }

    fn end_offset(&self) -> u64 {
        self.inner.read().cursor
    }

    fn flush(&self) -> Result<()> {
        if self.inner.read().closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn commit_metadata(&self, offset: u64, version: Version) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.last_persisted = Some(offset);
        inner.version = version;
        Ok(())
    }

    fn last_persisted_offset(&self) -> Option<u64> {
        self.inner.read().last_persisted
    }

    fn append_version(&self) -> Version {
        self.inner.read().version
    }

    fn close(&self) -> Result<()> {
        self.inner.write().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> MemoryStorage {
        MemoryStorage::new(&Options::new().with_page_size(256)).unwrap()
    }

    #[test]
    fn read_within_one_segment_is_a_slice() {
        let s = storage();
        s.append(b"hello world").unwrap();
        assert_eq!(&s.read(6, 5).unwrap()[..], b"world");
    }

    #[test]
    fn read_across_segments_is_stitched() {
        let s = storage();
        s.append(b"abc").unwrap();
        s.append(b"def").unwrap();
        s.append(b"ghi").unwrap();
        assert_eq!(&s.read(1, 7).unwrap()[..], b"bcdefgh");
        assert_eq!(s.segment_count(), 3);
    }

    #[test]
    fn read_past_cursor_is_eof() {
        let s = storage();
        s.append(b"abc").unwrap();
        assert!(matches!(s.read(2, 2), Err(Error::Eof)));
        assert!(matches!(s.read(u64::MAX, 2), Err(Error::Eof)));
    }

    #[test]
    fn closed_storage_rejects_io() {
        let s = storage();
        s.append(b"abc").unwrap();
        s.close().unwrap();
        assert!(matches!(s.append(b"x"), Err(Error::Closed)));
        assert!(matches!(s.read(0, 1), Err(Error::Closed)));
    }
}
