//! # Copy-on-Write B+Tree Storage Engine
//!
//! An embedded, append-only, multi-version key-value store.
//!
//! ## Core idea
//! Never overwrite a page. A write copies the nodes on its root-to-leaf
//! path, changes the copies, and appends them as new pages; everything it
//! did not touch is shared with the previous version. Each commit produces a
//! new root, and a small append-only log maps `(version, timestamp)` to that
//! root. Old versions stay readable for free, and readers never block on
//! the writer.
//!
//! ## Layout
//! - [`storage`]: append-only page store (`MemoryStorage`, `FileStorage`)
//! - [`btree`]: nodes, page format, node manager, the tree and snapshots
//! - [`root_index`]: the version → root log
//! - [`iterator`]: ordered cursors

pub mod btree;
pub mod codec;
pub mod error;
pub mod iterator;
pub mod options;
pub mod root_index;
pub mod search;
pub mod storage;
pub mod types;

// Public re-exports for the top-level API
pub use btree::{BTree, Snapshot, TreeState};
pub use codec::ByteOrder;
pub use error::{Error, Result};
pub use options::{Options, SyncPolicy};
pub use root_index::{RootIndex, RootIndexRecord};
pub use storage::{FileStorage, MemoryStorage, Storage};
