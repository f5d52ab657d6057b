use crate::btree::page::{LEAF_ENTRY_OVERHEAD, NON_LEAF_CHILD_SIZE, NON_LEAF_ENTRY_OVERHEAD, HEADER_SIZE};
use crate::search::{insertion_point, search};
use crate::types::{ChildRef, Key, NodeId, Value};

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// In memory only, owned by the current write batch.
    Dirty(NodeId),
    /// Read back from the page at this offset. Immutable.
    Committed(u64),
}

/// A B+Tree node: the common header plus the leaf/non-leaf payload.
#[derive(Debug, Clone)]
pub struct BTreeNode {
    pub(crate) state: NodeState,
    pub(crate) kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf(Leaf),
    NonLeaf(NonLeaf),
}

/// Sorted keys with a parallel array of values.
#[derive(Debug, Clone, Default)]
pub struct Leaf {
    pub(crate) keys: Vec<Key>,
    pub(crate) values: Vec<Value>,
}

/// Sorted separator keys with `keys.len() + 1` children.
///
/// ```text
///            [ k0 | k1 ]
///           /     |     \
///     x < k0  k0 <= x < k1  x >= k1
/// ```
#[derive(Debug, Clone)]
pub struct NonLeaf {
    pub(crate) keys: Vec<Key>,
    pub(crate) children: Vec<ChildRef>,
}

impl BTreeNode {
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Id of a dirty node; committed nodes have none.
    pub fn id(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Dirty(id) => Some(id),
            NodeState::Committed(_) => None,
        }
    }

    /// Page offset of a committed node.
    pub fn offset(&self) -> Option<u64> {
        match self.state {
            NodeState::Committed(offset) => Some(offset),
            NodeState::Dirty(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn key_count(&self) -> usize {
        self.kind.keys().len()
    }
}

impl NodeKind {
    pub fn keys(&self) -> &[Key] {
        match self {
            NodeKind::Leaf(leaf) => &leaf.keys,
            NodeKind::NonLeaf(node) => &node.keys,
        }
    }

    /// Bytes this node occupies once written to a page, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                NodeKind::Leaf(leaf) => leaf.payload_len(),
                NodeKind::NonLeaf(node) => node.payload_len(),
            }
    }
}

impl Leaf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        let idx = search(&self.keys, key);
        if idx >= 0 {
            Some(&self.values[idx as usize])
        } else {
            None
        }
    }

    /// Insert or overwrite. Returns true when an existing value was replaced,
    /// in which case the key count does not change.
    pub fn insert(&mut self, key: Key, value: Value) -> bool {
        let idx = search(&self.keys, &key);
        if idx >= 0 {
            self.values[idx as usize] = value;
            return true;
        }
        let at = insertion_point(idx);
        self.keys.insert(at, key);
        self.values.insert(at, value);
        false
    }

    pub(crate) fn entry_len(&self, i: usize) -> usize {
        LEAF_ENTRY_OVERHEAD + self.keys[i].len() + self.values[i].len()
    }

    fn payload_len(&self) -> usize {
        (0..self.len()).map(|i| self.entry_len(i)).sum()
    }

    /// Move entries `[at..]` into a new right sibling. The separator to
    /// promote is the right sibling's first key.
    pub(crate) fn split_off(&mut self, at: usize) -> (Key, Leaf) {
        let right = Leaf {
            keys: self.keys.split_off(at),
            values: self.values.split_off(at),
        };
        (right.keys[0].clone(), right)
    }
}

impl NonLeaf {
    pub fn new(keys: Vec<Key>, children: Vec<ChildRef>) -> Self {
        debug_assert_eq!(children.len(), keys.len() + 1);
        NonLeaf { keys, children }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Index of the child whose range covers `key`.
    ///
    /// A key equal to separator `i` belongs to the right of it, child
    /// `i + 1`, since a leaf split promotes the right half's first key.
    pub fn child_index(&self, key: &[u8]) -> usize {
        let idx = search(&self.keys, key);
        if idx >= 0 {
            idx as usize + 1
        } else {
            insertion_point(idx)
        }
    }

    /// Replace child `idx` with the two halves of its split.
    pub(crate) fn insert_split(&mut self, idx: usize, left: ChildRef, separator: Key, right: ChildRef) {
        self.children[idx] = left;
        self.keys.insert(idx, separator);
        self.children.insert(idx + 1, right);
    }

    pub(crate) fn entry_len(&self, i: usize) -> usize {
        NON_LEAF_ENTRY_OVERHEAD + self.keys[i].len()
    }

    fn payload_len(&self) -> usize {
        NON_LEAF_CHILD_SIZE + (0..self.keys.len()).map(|i| self.entry_len(i)).sum::<usize>()
    }

    /// Promote key `at`; keys and children to its right move into a new
    /// sibling.
    pub(crate) fn split_off(&mut self, at: usize) -> (Key, NonLeaf) {
        let right_keys = self.keys.split_off(at + 1);
        let right_children = self.children.split_off(at + 1);
        let separator = self.keys.pop().unwrap_or_default();
        (
            separator,
            NonLeaf {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}
