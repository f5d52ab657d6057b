use bytes::Bytes;

/// Raw key bytes. Keys are ordered lexicographically.
pub type Key = Bytes;

/// Raw value bytes.
pub type Value = Bytes;

/// A committed tree version. Incremented by exactly one per commit.
pub type Version = u64;

/// Epoch milliseconds recorded alongside each version.
pub type Timestamp = u64;

/// Version of the empty tree before anything has been committed.
pub const INITIAL_VERSION: Version = 0;

/// Identifies a node inside one tree instance.
///
/// Ids come from a per-manager monotonic counter and are never reused. They
/// are unrelated to storage offsets: their only job is to let a non-leaf
/// point at a child that has not been written yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Where a non-leaf finds one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    /// A dirty node owned by the current write batch.
    Unpersisted(NodeId),
    /// A committed node, addressed by the byte offset of its page.
    Persisted(u64),
}

impl ChildRef {
    /// Offset of a committed child, `None` while it is still dirty.
    pub fn offset(&self) -> Option<u64> {
        match self {
            ChildRef::Persisted(offset) => Some(*offset),
            ChildRef::Unpersisted(_) => None,
        }
    }
}
