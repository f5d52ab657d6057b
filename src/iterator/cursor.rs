use std::sync::Arc;

use crate::btree::manager::NodeSource;
use crate::btree::node::{BTreeNode, NodeKind};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::search::{insertion_point, search};
use crate::types::ChildRef;

/// In-order cursor over a B+Tree rooted at a fixed child reference.
///
/// Keeps the root-to-leaf path as a stack of `(node, index)`: for non-leaves
/// the index is the child being visited, for the leaf on top it is the
/// current entry. Advancing past a leaf pops up to the first ancestor with
/// a child to its right and descends to that child's leftmost leaf.
pub struct TreeIterator<'a, N: NodeSource> {
    source: &'a N,
    root: Option<ChildRef>,
    stack: Vec<(Arc<BTreeNode>, usize)>,
}

impl<'a, N: NodeSource> TreeIterator<'a, N> {
    /// Cursor positioned at the smallest key.
    pub fn new(source: &'a N, root: Option<ChildRef>) -> Result<Self> {
        let mut iter = TreeIterator {
            source,
            root,
            stack: Vec::new(),
        };
        iter.seek(&[])?;
        Ok(iter)
    }

    fn current(&self) -> Option<(&[u8], &[u8])> {
        let (node, idx) = self.stack.last()?;
        match &node.kind {
            NodeKind::Leaf(leaf) if *idx < leaf.len() => {
                Some((&leaf.keys[*idx][..], &leaf.values[*idx][..]))
            }
            _ => None,
        }
    }

    /// Push `child` and everything down its leftmost edge.
    fn descend_leftmost(&mut self, child: ChildRef) -> Result<()> {
        let mut next = child;
        loop {
            let node = self.source.resolve(&next)?;
            let down = match &node.kind {
                NodeKind::NonLeaf(non_leaf) => Some(non_leaf.children[0]),
                NodeKind::Leaf(_) => None,
            };
            self.stack.push((node, 0));
            match down {
                Some(child) => next = child,
                None => return Ok(()),
            }
        }
    }

    /// Move forward until the top of the stack is a leaf entry, or the stack
    /// is empty.
    fn settle(&mut self) -> Result<()> {
        while let Some((node, idx)) = self.stack.last() {
            let exhausted = match &node.kind {
                NodeKind::Leaf(leaf) => *idx >= leaf.len(),
                NodeKind::NonLeaf(_) => true,
            };
            if !exhausted {
                return Ok(());
            }
            self.stack.pop();

            // Find the nearest ancestor with an unvisited child on the right.
            while let Some((parent, child_idx)) = self.stack.last_mut() {
                let NodeKind::NonLeaf(non_leaf) = &parent.kind else {
                    break;
                };
                if *child_idx + 1 < non_leaf.children.len() {
                    *child_idx += 1;
                    let child = non_leaf.children[*child_idx];
                    self.descend_leftmost(child)?;
                    break;
                }
                self.stack.pop();
            }
        }
        Ok(())
    }
}

impl<N: NodeSource> StorageIterator for TreeIterator<'_, N> {
    fn key(&self) -> &[u8] {
        self.current().map(|(k, _)| k).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current().map(|(_, v)| v).unwrap_or_default()
    }

    fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some((_, idx)) = self.stack.last_mut() {
            *idx += 1;
        }
        self.settle()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.stack.clear();
        let Some(mut next) = self.root else {
            return Ok(());
        };

        loop {
            let node = self.source.resolve(&next)?;
            let (idx, down) = match &node.kind {
                NodeKind::NonLeaf(non_leaf) => {
                    let idx = non_leaf.child_index(key);
                    (idx, Some(non_leaf.children[idx]))
                }
                NodeKind::Leaf(leaf) => {
                    let found = search(&leaf.keys, key);
                    let idx = if found >= 0 {
                        found as usize
                    } else {
                        insertion_point(found)
                    };
                    (idx, None)
                }
            };
            self.stack.push((node, idx));
            match down {
                Some(child) => next = child,
                None => break,
            }
        }
        self.settle()
    }
}
