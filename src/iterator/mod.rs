pub mod cursor;

pub use cursor::TreeIterator;

use crate::error::Result;

/// Ordered, seekable cursor over key-value entries.
///
/// Implemented by [`TreeIterator`] for both the writer's pending tree and
/// read-only snapshots. A cursor sits on one entry at a time; `key()` and
/// `value()` return empty slices once it has run off the end.
pub trait StorageIterator {
    /// Key under the cursor.
    fn key(&self) -> &[u8];

    /// Value under the cursor.
    fn value(&self) -> &[u8];

    /// False once the cursor has moved past the last entry.
    fn is_valid(&self) -> bool;

    /// Step to the next entry in key order. Loading a page may fail.
    fn next(&mut self) -> Result<()>;

    /// Reposition at the first entry whose key is >= `key`.
    fn seek(&mut self, key: &[u8]) -> Result<()>;
}
