pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use bytes::{Bytes, BytesMut};

use crate::codec::ByteOrder;
use crate::error::{Error, Result};
use crate::types::Version;

/// Append-only, page-oriented backing store.
///
/// Everything durable goes through [`Storage::append`]: bytes are written at
/// the allocation cursor, the cursor moves forward by the buffer length, and
/// the start offset is returned. Offsets are never reused and nothing is ever
/// overwritten, which is what lets old tree versions share pages with new
/// ones.
///
/// All methods take `&self` so one `Arc<S>` can be shared by the writer and
/// any number of snapshot readers; implementations lock internally.
pub trait Storage: Send + Sync {
    /// Fixed page size in bytes.
    fn page_size(&self) -> usize;

    /// Byte order for every integer the engine encodes.
    fn byte_order(&self) -> ByteOrder;

    /// A zeroed, page-sized buffer not yet bound to any offset.
    fn allocate_page(&self) -> BytesMut {
        BytesMut::zeroed(self.page_size())
    }

    /// Same contract as [`Storage::allocate_page`]. Kept separate so backends
    /// can hand out buffers from a different pool.
    fn uninitiated_page(&self) -> BytesMut {
        self.allocate_page()
    }

    /// Convert a page-aligned byte offset to a page number.
    fn page_number(&self, offset: u64) -> Result<u64> {
        let page_size = self.page_size() as u64;
        if offset % page_size != 0 {
            return Err(Error::Bounds {
                expected: 0,
                actual: (offset % page_size) as usize,
            });
        }
        Ok(offset / page_size)
    }

    /// Convert a page number to its byte offset. [`Error::Eof`] when the
    /// offset does not fit in a `u64`.
    fn offset(&self, page_number: u64) -> Result<u64> {
        page_number
            .checked_mul(self.page_size() as u64)
            .ok_or(Error::Eof)
    }

    /// Write `data` at the next free offset and return where it landed.
    /// Either the whole buffer is written or an error is returned and the
    /// cursor stays where it was.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// [`Storage::append`], then convert the start offset to a page number.
    /// Fails with [`Error::Bounds`] when the cursor was not page aligned.
    fn append_page_aligned(&self, data: &[u8]) -> Result<u64> {
        let offset = self.append(data)?;
        self.page_number(offset)
    }

    /// Read `len` bytes starting at `offset`. [`Error::Eof`] past the cursor.
    fn read(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Map a page by number.
    fn map_page(&self, page_number: u64) -> Result<Bytes> {
        self.read(self.offset(page_number)?, self.page_size())
    }

    /// The allocation cursor: total bytes appended so far.
    fn end_offset(&self) -> u64;

    /// Make every appended byte durable.
    fn flush(&self) -> Result<()>;

    /// Record that `version` is fully committed and that its root record
    /// lives at `offset`. This is the commit barrier.
    fn commit_metadata(&self, offset: u64, version: Version) -> Result<()>;

    /// Offset of the last committed root record, `None` before any commit.
    fn last_persisted_offset(&self) -> Option<u64>;

    /// Last committed version, [`crate::types::INITIAL_VERSION`] before any commit.
    fn append_version(&self) -> Version;

    /// Flush and release the backing medium. Later I/O fails with
    /// [`Error::Closed`].
    fn close(&self) -> Result<()>;
}
