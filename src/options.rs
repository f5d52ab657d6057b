use crate::codec::ByteOrder;
use crate::error::{Error, Result};

/// Default page size. Matches the OS page size on most hosts.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page that still leaves room for a handful of entries.
pub const MIN_PAGE_SIZE: usize = 256;

/// Largest page; entry lengths inside a page are stored as u16.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Controls when `FileStorage` fsyncs appended bytes.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: every append is on disk before it returns
///   - EveryNWrites: lose up to N appends on crash
///   - EveryNMillis: bounded loss window
///
/// Regardless of policy, `flush()` always fsyncs, and a commit always
/// flushes, so committed versions are durable under every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync after every append. Safest, slowest.
    EveryWrite,
    /// fsync every N appends.
    EveryNWrites(usize),
    /// fsync when at least N milliseconds passed since the last sync.
    EveryNMillis(u64),
    /// Only fsync on explicit flush (i.e. once per commit).
    #[default]
    OnFlush,
}

/// Configuration shared by the storage backends and the tree.
#[derive(Debug, Clone)]
pub struct Options {
    /// Page size in bytes. Fixed when the storage is created.
    pub page_size: usize,
    /// Byte order of every integer written to storage.
    pub byte_order: ByteOrder,
    /// Split a node once it holds more keys than this, even if it still fits
    /// its page. `None` splits on page overflow only.
    pub max_keys_per_node: Option<usize>,
    /// fsync policy for `FileStorage`.
    pub sync_policy: SyncPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            byte_order: ByteOrder::default(),
            max_keys_per_node: None,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Cap the fan-out. Values below 3 are raised to 3 so that a split always
    /// leaves a non-empty node on each side of the promoted key.
    pub fn with_max_keys_per_node(mut self, max_keys: usize) -> Self {
        self.max_keys_per_node = Some(max_keys.max(3));
        self
    }

    pub fn with_sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }

    /// Reject configurations the page layout cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Bounds {
                expected: DEFAULT_PAGE_SIZE,
                actual: self.page_size,
            });
        }
        Ok(())
    }
}
