use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::btree::node::{BTreeNode, Leaf, NodeKind, NodeState, NonLeaf};
use crate::btree::page::{self, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::root_index::RootIndexRecord;
use crate::storage::Storage;
use crate::types::{ChildRef, Key, NodeId};

/// Resolves child references to nodes.
///
/// Implemented by [`NodesManager`] (dirty arena + storage) for the writer's
/// pending tree and by [`crate::btree::Snapshot`] (storage only) for readers.
pub trait NodeSource {
    fn resolve(&self, child: &ChildRef) -> Result<Arc<BTreeNode>>;
}

/// Bridges B+Tree nodes and storage pages.
///
/// Owns the id counter and the arena of dirty nodes created by the current
/// write batch. Committed nodes are never cached here: they are decoded
/// straight from the page bytes on every access, as zero-copy views.
///
/// A dirty node is reachable from exactly one parent (or is the pending
/// root), so when a later `put` clones it again the old copy is garbage and
/// is dropped from the arena.
pub struct NodesManager<S: Storage> {
    storage: Arc<S>,
    next_id: u64,
    dirty: HashMap<NodeId, Arc<BTreeNode>>,
    max_keys: Option<usize>,
}

impl<S: Storage> NodesManager<S> {
    pub fn new(storage: Arc<S>, max_keys: Option<usize>) -> Self {
        NodesManager {
            storage,
            next_id: 0,
            dirty: HashMap::new(),
            max_keys,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Root page offset of the last committed version, `None` for a store
    /// that has never committed.
    pub fn load_last_root(&self) -> Result<Option<u64>> {
        let Some(record_offset) = self.storage.last_persisted_offset() else {
            return Ok(None);
        };
        let bytes = self.storage.read(record_offset, RootIndexRecord::SIZE)?;
        let record = RootIndexRecord::decode(&bytes, self.storage.byte_order())?;
        Ok(Some(record.offset))
    }

    fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a new dirty node under a fresh id.
    pub fn create(&mut self, kind: NodeKind) -> ChildRef {
        let id = self.next_id();
        self.dirty.insert(
            id,
            Arc::new(BTreeNode {
                state: NodeState::Dirty(id),
                kind,
            }),
        );
        ChildRef::Unpersisted(id)
    }

    pub fn new_leaf(&mut self, leaf: Leaf) -> ChildRef {
        self.create(NodeKind::Leaf(leaf))
    }

    pub fn new_non_leaf(&mut self, node: NonLeaf) -> ChildRef {
        self.create(NodeKind::NonLeaf(node))
    }

    /// Copy-on-write: an independently owned copy of the node's content.
    /// The copy gets its id when it is handed back through [`Self::create`].
    pub fn cow(&self, child: &ChildRef) -> Result<NodeKind> {
        Ok(self.resolve(child)?.kind.clone())
    }

    /// Drop superseded dirty nodes.
    pub fn release(&mut self, ids: &[NodeId]) {
        for id in ids {
            self.dirty.remove(id);
        }
    }

    /// Drop every dirty node.
    pub fn discard(&mut self) {
        self.dirty.clear();
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Read the committed node at `offset`.
    pub fn load(&self, offset: u64) -> Result<Arc<BTreeNode>> {
        Ok(Arc::new(page::load(self.storage.as_ref(), offset)?))
    }

    /// Largest leaf entry accepted by `put`. Keeps any split within a page:
    /// after a byte-balanced split neither half can exceed the page.
    pub fn max_entry_size(&self) -> usize {
        (self.storage.page_size() - HEADER_SIZE) / 4
    }

    /// Whether `kind` must be split before it can be written.
    pub fn overflows(&self, kind: &NodeKind) -> bool {
        kind.encoded_len() > self.storage.page_size()
            || self.max_keys.is_some_and(|max| kind.keys().len() > max)
    }

    /// Split an overflowing node at its byte-weighted median and register
    /// both halves. Returns `(left, separator, right)`.
    pub fn split(&mut self, kind: NodeKind) -> (ChildRef, Key, ChildRef) {
        let (left, separator, right) = match kind {
            NodeKind::Leaf(mut leaf) => {
                let sizes: Vec<usize> = (0..leaf.len()).map(|i| leaf.entry_len(i)).collect();
                let at = median(&sizes).clamp(1, leaf.len() - 1);
                let (separator, right) = leaf.split_off(at);
                (NodeKind::Leaf(leaf), separator, NodeKind::Leaf(right))
            }
            NodeKind::NonLeaf(mut node) => {
                let sizes: Vec<usize> = (0..node.keys.len()).map(|i| node.entry_len(i)).collect();
                let at = median(&sizes).clamp(1, node.keys.len() - 2);
                let (separator, right) = node.split_off(at);
                (NodeKind::NonLeaf(node), separator, NodeKind::NonLeaf(right))
            }
        };
        debug!(
            left_keys = left.keys().len(),
            right_keys = right.keys().len(),
            "split node"
        );
        (self.create(left), separator, self.create(right))
    }

    /// Build a root over two halves of a split root.
    pub fn new_root(&mut self, left: ChildRef, separator: Key, right: ChildRef) -> ChildRef {
        self.new_non_leaf(NonLeaf::new(vec![separator], vec![left, right]))
    }

    /// Write every dirty node reachable from `root`, children before
    /// parents, and return the root's page offset.
    ///
    /// The arena is left untouched so a failed commit can be retried; the
    /// caller discards it once the whole commit succeeds.
    pub fn persist(&self, root: ChildRef) -> Result<u64> {
        let mut pages = 0usize;
        let offset = self.persist_node(root, &mut pages)?;
        debug!(pages, root = offset, "persisted dirty nodes");
        Ok(offset)
    }

    fn persist_node(&self, child: ChildRef, pages: &mut usize) -> Result<u64> {
        let id = match child {
            ChildRef::Persisted(offset) => return Ok(offset),
            ChildRef::Unpersisted(id) => id,
        };
        let node = self
            .dirty
            .get(&id)
            .ok_or_else(|| Error::Corruption(format!("dangling dirty node {id:?}")))?;

        let kind = match &node.kind {
            NodeKind::Leaf(leaf) => NodeKind::Leaf(leaf.clone()),
            NodeKind::NonLeaf(non_leaf) => {
                let mut non_leaf = non_leaf.clone();
                for slot in non_leaf.children.iter_mut() {
                    *slot = ChildRef::Persisted(self.persist_node(*slot, pages)?);
                }
                NodeKind::NonLeaf(non_leaf)
            }
        };

        let mut page = self.storage.allocate_page();
        page::encode_into(&kind, self.storage.byte_order(), &mut page)?;
        let offset = self.storage.append(&page)?;
        *pages += 1;
        Ok(offset)
    }
}

impl<S: Storage> NodeSource for NodesManager<S> {
    fn resolve(&self, child: &ChildRef) -> Result<Arc<BTreeNode>> {
        match child {
            ChildRef::Unpersisted(id) => self
                .dirty
                .get(id)
                .cloned()
                .ok_or_else(|| Error::Corruption(format!("dangling dirty node {id:?}"))),
            ChildRef::Persisted(offset) => self.load(*offset),
        }
    }
}

/// Index at which the running total first reaches half of the total.
fn median(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    let mut running = 0;
    for (i, size) in sizes.iter().enumerate() {
        if running * 2 >= total {
            return i;
        }
        running += size;
    }
    sizes.len()
}
