pub mod manager;
pub mod node;
pub mod page;
pub mod snapshot;

pub use manager::{NodeSource, NodesManager};
pub use node::{BTreeNode, Leaf, NodeKind, NodeState, NonLeaf};
pub use snapshot::Snapshot;

use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::iterator::TreeIterator;
use crate::options::Options;
use crate::root_index::{RootIndex, RootIndexRecord};
use crate::storage::Storage;
use crate::types::{ChildRef, INITIAL_VERSION, Key, NodeId, Timestamp, Value, Version};

/// Where the tree stands between commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    /// Nothing committed and nothing pending.
    Bootstrap,
    /// Uncommitted mutations exist.
    Open,
    /// The current root is durable.
    Committed,
}

/// Outcome of inserting into one subtree.
enum Insertion {
    /// The subtree was rewritten in place of the old one.
    Single(ChildRef),
    /// The subtree overflowed and came back as two siblings.
    Split {
        left: ChildRef,
        separator: Key,
        right: ChildRef,
    },
}

/// A multi-version, copy-on-write B+Tree over an append-only [`Storage`].
///
/// Writes never touch committed pages. `put` clones every node on the path
/// from the root to the target leaf, changes the clones, and installs the
/// result as a pending root. `commit` appends the dirty nodes bottom-up,
/// records the new root in the [`RootIndex`], and bumps the version. Every
/// version stays readable through [`BTree::snapshot_at_version`] because
/// untouched subtrees are shared, never rewritten.
///
/// ```text
///   v1 root            v2 root  (after put into the rightmost leaf)
///   ┌──┴──┐            ┌──┴──┐
///   A     B            A     B'      A is shared; B' is B's copy
/// ```
///
/// Single writer: mutators take `&mut self`. Readers on other threads use
/// [`Snapshot`]s.
pub struct BTree<S: Storage> {
    manager: NodesManager<S>,
    root_index: RootIndex<S>,
    /// Root including uncommitted changes.
    root: Option<ChildRef>,
    /// Root of the last committed version.
    committed_root: Option<u64>,
    version: Version,
}

impl<S: Storage> BTree<S> {
    /// Open the tree stored in `storage`, resuming from its last committed
    /// version, or start an empty tree if nothing was committed yet.
    pub fn open(storage: Arc<S>, options: &Options) -> Result<Self> {
        let manager = NodesManager::new(Arc::clone(&storage), options.max_keys_per_node);
        let root_index = RootIndex::recover(storage)?;
        let committed_root = manager.load_last_root()?;

        let last = root_index.last();
        if committed_root.is_some_and(|root| root != last.offset) {
            return Err(Error::Corruption(format!(
                "commit metadata root {committed_root:?} disagrees with root log {}",
                last.offset
            )));
        }

        info!(version = last.version, root = ?committed_root, "opened tree");

        Ok(BTree {
            manager,
            root_index,
            root: committed_root.map(ChildRef::Persisted),
            committed_root,
            version: last.version,
        })
    }

    /// Last committed version.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> TreeState {
        if self.is_dirty() {
            TreeState::Open
        } else if self.version == INITIAL_VERSION {
            TreeState::Bootstrap
        } else {
            TreeState::Committed
        }
    }

    /// Whether there are uncommitted mutations.
    pub fn is_dirty(&self) -> bool {
        self.root != self.committed_root.map(ChildRef::Persisted)
    }

    pub fn root_index(&self) -> &RootIndex<S> {
        &self.root_index
    }

    pub fn nodes(&self) -> &NodesManager<S> {
        &self.manager
    }

    pub fn storage(&self) -> &Arc<S> {
        self.manager.storage()
    }

    /// Insert or overwrite `key`. Visible to [`BTree::get`] immediately,
    /// durable after [`BTree::commit`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let size = page::LEAF_ENTRY_OVERHEAD + key.len() + value.len();
        let max = self.manager.max_entry_size();
        if size > max {
            return Err(Error::EntryTooLarge { size, max });
        }

        let key = Bytes::copy_from_slice(key);
        let value = Bytes::copy_from_slice(value);

        let Some(root) = self.root else {
            let mut leaf = Leaf::new();
            leaf.insert(key, value);
            self.root = Some(self.manager.new_leaf(leaf));
            return Ok(());
        };

        let mut superseded = Vec::new();
        let new_root = match self.insert(root, &key, &value, &mut superseded)? {
            Insertion::Single(child) => child,
            Insertion::Split {
                left,
                separator,
                right,
            } => {
                debug!("root split, tree grows a level");
                self.manager.new_root(left, separator, right)
            }
        };
        self.manager.release(&superseded);
        self.root = Some(new_root);
        Ok(())
    }

    /// Copy-on-write insert into the subtree at `at`.
    fn insert(
        &mut self,
        at: ChildRef,
        key: &Key,
        value: &Value,
        superseded: &mut Vec<NodeId>,
    ) -> Result<Insertion> {
        let kind = match self.manager.cow(&at)? {
            NodeKind::Leaf(mut leaf) => {
                leaf.insert(key.clone(), value.clone());
                NodeKind::Leaf(leaf)
            }
            NodeKind::NonLeaf(mut non_leaf) => {
                let idx = non_leaf.child_index(key);
                match self.insert(non_leaf.children[idx], key, value, superseded)? {
                    Insertion::Single(child) => non_leaf.children[idx] = child,
                    Insertion::Split {
                        left,
                        separator,
                        right,
                    } => non_leaf.insert_split(idx, left, separator, right),
                }
                NodeKind::NonLeaf(non_leaf)
            }
        };

        if let ChildRef::Unpersisted(id) = at {
            superseded.push(id);
        }

        if self.manager.overflows(&kind) {
            let (left, separator, right) = self.manager.split(kind);
            Ok(Insertion::Split {
                left,
                separator,
                right,
            })
        } else {
            Ok(Insertion::Single(self.manager.create(kind)))
        }
    }

    /// Read `key` from the current tree, uncommitted changes included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        lookup(&self.manager, self.root, key)
    }

    /// Read `key` as of a committed version.
    pub fn get_at_version(&self, key: &[u8], version: Version) -> Result<Option<Value>> {
        self.snapshot_at_version(version)?.get(key)
    }

    /// Read `key` as of the newest version committed at or before `timestamp`.
    pub fn get_at_timestamp(&self, key: &[u8], timestamp: Timestamp) -> Result<Option<Value>> {
        self.snapshot_at_timestamp(timestamp)?.get(key)
    }

    /// View of the last committed version.
    pub fn snapshot(&self) -> Snapshot<S> {
        let timestamp = self
            .root_index
            .find_version(self.version)
            .map_or(0, |record| record.timestamp);
        Snapshot::new(
            Arc::clone(self.storage()),
            self.committed_root,
            self.version,
            timestamp,
        )
    }

    /// View of a specific committed version. Version 0 is the empty tree.
    pub fn snapshot_at_version(&self, version: Version) -> Result<Snapshot<S>> {
        if version == INITIAL_VERSION {
            return Ok(Snapshot::new(Arc::clone(self.storage()), None, INITIAL_VERSION, 0));
        }
        let record = self
            .root_index
            .find_version(version)
            .ok_or(Error::VersionNotFound(version))?;
        Ok(Snapshot::new(
            Arc::clone(self.storage()),
            Some(record.offset),
            record.version,
            record.timestamp,
        ))
    }

    /// View of the newest version committed at or before `timestamp`.
    pub fn snapshot_at_timestamp(&self, timestamp: Timestamp) -> Result<Snapshot<S>> {
        let record = self
            .root_index
            .find_timestamp(timestamp)
            .ok_or(Error::TimestampNotFound(timestamp))?;
        Ok(Snapshot::new(
            Arc::clone(self.storage()),
            Some(record.offset),
            record.version,
            record.timestamp,
        ))
    }

    /// Commit pending changes stamped with the current wall-clock time.
    pub fn commit(&mut self) -> Result<Version> {
        let now = chrono::Utc::now().timestamp_millis().max(0) as Timestamp;
        self.commit_at(now)
    }

    /// Commit pending changes as a new version stamped `timestamp`.
    ///
    /// Steps, in order:
    /// 1. Append every dirty node, children first
    /// 2. Append the root record and write the commit metadata (the barrier)
    /// 3. Flush the storage
    /// 4. Publish the record to the root index and adopt the new root and version
    ///
    /// If any step fails the version, committed root and root index stay
    /// where they were and the dirty nodes are kept, so the commit can be
    /// retried or rolled back. Lookups by version or timestamp never see the
    /// failed attempt. Pages appended by it are never read. When
    /// the failure comes after the barrier, the storage may already name the
    /// new version; a retry commits that same version number again and
    /// recovery keeps only the later record.
    pub fn commit_at(&mut self, timestamp: Timestamp) -> Result<Version> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let empty = self.manager.new_leaf(Leaf::new());
                self.root = Some(empty);
                empty
            }
        };

        let root_offset = self.manager.persist(root)?;
        let next = self.version + 1;
        let record = RootIndexRecord::new(next, timestamp, root_offset);
        self.root_index.write(record)?;
        self.root_index.commit()?;

        self.root_index.publish(record);
        self.manager.discard();
        self.version = next;
        self.committed_root = Some(root_offset);
        self.root = Some(ChildRef::Persisted(root_offset));
        info!(version = next, root = root_offset, timestamp, "committed");
        Ok(next)
    }

    /// Throw away uncommitted changes.
    pub fn rollback(&mut self) {
        self.manager.discard();
        self.root = self.committed_root.map(ChildRef::Persisted);
    }

    /// Ordered cursor over the current tree, uncommitted changes included.
    pub fn iter(&self) -> Result<TreeIterator<'_, NodesManager<S>>> {
        TreeIterator::new(&self.manager, self.root)
    }

    /// Printed structure of the current tree, one node per line:
    ///
    /// ```text
    /// NonLeaf[050]
    ///   Leaf[000, 001, ..., 049]
    ///   Leaf[050, 051, ..., 099]
    /// ```
    ///
    /// Node ids and offsets are left out, so a tree reloaded from storage
    /// prints exactly like the one that wrote it.
    pub fn dump(&self) -> Result<String> {
        dump(&self.manager, self.root)
    }

    /// Release the storage. Snapshots still holding it will fail their
    /// next read.
    pub fn close(self) -> Result<()> {
        self.storage().close()
    }
}

/// Descend from `root` to the leaf covering `key`.
pub(crate) fn lookup<N: NodeSource>(
    source: &N,
    root: Option<ChildRef>,
    key: &[u8],
) -> Result<Option<Value>> {
    let Some(mut next) = root else {
        return Ok(None);
    };
    loop {
        let node = source.resolve(&next)?;
        match &node.kind {
            NodeKind::Leaf(leaf) => return Ok(leaf.get(key).cloned()),
            NodeKind::NonLeaf(non_leaf) => next = non_leaf.children[non_leaf.child_index(key)],
        }
    }
}

pub(crate) fn dump<N: NodeSource>(source: &N, root: Option<ChildRef>) -> Result<String> {
    let mut out = String::new();
    if let Some(root) = root {
        dump_node(source, root, 0, &mut out)?;
    }
    Ok(out)
}

fn dump_node<N: NodeSource>(source: &N, at: ChildRef, depth: usize, out: &mut String) -> Result<()> {
    let node = source.resolve(&at)?;
    let label = if node.is_leaf() { "Leaf" } else { "NonLeaf" };
    let keys: Vec<String> = node.kind.keys().iter().map(|k| printable(k)).collect();
    let _ = writeln!(out, "{:indent$}{label}[{}]", "", keys.join(", "), indent = depth * 2);

    if let NodeKind::NonLeaf(non_leaf) = &node.kind {
        for child in &non_leaf.children {
            dump_node(source, *child, depth + 1, out)?;
        }
    }
    Ok(())
}

fn printable(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => bytes.iter().map(|b| format!("{b:02x}")).collect(),
    }
}
