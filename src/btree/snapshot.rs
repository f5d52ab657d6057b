use std::sync::Arc;

use crate::btree::manager::NodeSource;
use crate::btree::node::BTreeNode;
use crate::btree::{dump, lookup, page};
use crate::error::{Error, Result};
use crate::iterator::{StorageIterator, TreeIterator};
use crate::storage::Storage;
use crate::types::{ChildRef, Timestamp, Value, Version};

/// A read-only view of one committed version.
///
/// Holds its own handle on the storage and a fixed root offset, so it stays
/// consistent while the writer keeps committing: pages it can reach are
/// never modified. Cheap to create and safe to send to other threads.
pub struct Snapshot<S: Storage> {
    storage: Arc<S>,
    root: Option<u64>,
    version: Version,
    timestamp: Timestamp,
}

impl<S: Storage> Snapshot<S> {
    pub(crate) fn new(storage: Arc<S>, root: Option<u64>, version: Version, timestamp: Timestamp) -> Self {
        Snapshot {
            storage,
            root,
            version,
            timestamp,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Commit time of this version (0 for the empty initial version).
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Root page offset, `None` for the empty initial version.
    pub fn root_offset(&self) -> Option<u64> {
        self.root
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        lookup(self, self.root.map(ChildRef::Persisted), key)
    }

    /// Ordered cursor over this version's entries.
    pub fn iter(&self) -> Result<TreeIterator<'_, Self>> {
        TreeIterator::new(self, self.root.map(ChildRef::Persisted))
    }

    /// Number of entries, counted by walking the leaves.
    pub fn len(&self) -> Result<usize> {
        let mut iter = self.iter()?;
        let mut count = 0;
        while iter.is_valid() {
            count += 1;
            iter.next()?;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.iter()?.is_valid())
    }

    /// Printed structure of this version; see [`crate::btree::BTree::dump`].
    pub fn dump(&self) -> Result<String> {
        dump(self, self.root.map(ChildRef::Persisted))
    }
}

impl<S: Storage> NodeSource for Snapshot<S> {
    fn resolve(&self, child: &ChildRef) -> Result<Arc<BTreeNode>> {
        match child {
            ChildRef::Persisted(offset) => Ok(Arc::new(page::load(self.storage.as_ref(), *offset)?)),
            ChildRef::Unpersisted(id) => Err(Error::Corruption(format!(
                "snapshot reached dirty node {id:?}"
            ))),
        }
    }
}

impl<S: Storage> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Snapshot {
            storage: Arc::clone(&self.storage),
            root: self.root,
            version: self.version,
            timestamp: self.timestamp,
        }
    }
}
