pub mod record;

pub use record::RootIndexRecord;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::btree::page;
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{INITIAL_VERSION, Timestamp, Version};

/// Append-only log of committed roots: `(version, timestamp, root offset)`.
///
/// Records are appended to the same storage as the node pages, right after
/// the pages of the version they describe:
///
/// ```text
/// ┌────────┬────────┬─────┬──────────┬────────┬─────┬──────────┬─ ─ ─
/// │ page   │ page   │ ... │ record v1│ page   │ ... │ record v2│
/// └────────┴────────┴─────┴──────────┴────────┴─────┴──────────┴─ ─ ─
///                                                   ▲
///                              commit_metadata(offset, 2)
/// ```
///
/// The storage's commit metadata points at the newest record, so the latest
/// root is found in one read. Older versions are found by scanning the log
/// once at recovery ([`RootIndex::recover`]) and keeping the records in
/// memory.
pub struct RootIndex<S: Storage> {
    storage: Arc<S>,
    last: RootIndexRecord,
    history: Vec<RootIndexRecord>,
}

impl<S: Storage> RootIndex<S> {
    /// Start from a known triple, either a bootstrap value or one recovered
    /// elsewhere. History starts empty.
    pub fn new(storage: Arc<S>, version: Version, timestamp: Timestamp, offset: u64) -> Self {
        RootIndex {
            storage,
            last: RootIndexRecord::new(version, timestamp, offset),
            history: Vec::new(),
        }
    }

    /// Rebuild the index from the log.
    ///
    /// Walks the storage from offset 0 up to the record named by the commit
    /// metadata. Intact node pages are skipped a page at a time; everything
    /// else is a record. A record whose version does not move forward is
    /// a leftover of a commit that failed after appending its record, and is
    /// superseded by the later one.
    pub fn recover(storage: Arc<S>) -> Result<Self> {
        let Some(last_offset) = storage.last_persisted_offset() else {
            return Ok(Self::new(storage, INITIAL_VERSION, 0, 0));
        };

        let order = storage.byte_order();
        let page_size = storage.page_size() as u64;
        let end = storage.end_offset();
        let mut history: Vec<RootIndexRecord> = Vec::new();
        let mut pos = 0u64;

        loop {
            if pos > last_offset {
                return Err(Error::Corruption(format!(
                    "root log overran committed record at {last_offset}"
                )));
            }

            if pos < last_offset && pos + page_size <= end {
                let candidate = storage.read(pos, page_size as usize)?;
                if page::is_node_page(&candidate, order) {
                    pos += page_size;
                    continue;
                }
            }

            let bytes = storage.read(pos, RootIndexRecord::SIZE)?;
            let record = RootIndexRecord::decode(&bytes, order)?;
            if let Some(prev) = history.last() {
                if record.version <= prev.version {
                    warn!(
                        version = record.version,
                        offset = pos,
                        "superseding orphaned root records"
                    );
                    history.retain(|r| r.version < record.version);
                }
            }
            history.push(record);

            if pos == last_offset {
                break;
            }
            pos += RootIndexRecord::SIZE as u64;
        }

        let last = *history
            .last()
            .ok_or_else(|| Error::Corruption("empty root log".into()))?;
        if last.version != storage.append_version() {
            return Err(Error::Corruption(format!(
                "root log ends at version {} but commit metadata says {}",
                last.version,
                storage.append_version()
            )));
        }

        info!(
            versions = history.len(),
            version = last.version,
            root = last.offset,
            "recovered root index"
        );

        Ok(RootIndex {
            storage,
            last,
            history,
        })
    }

    /// Record a committed version. Returns the offset of the record itself,
    /// which is what the commit metadata anchors on.
    pub fn append(&mut self, version: Version, timestamp: Timestamp, offset: u64) -> Result<u64> {
        let record = RootIndexRecord::new(version, timestamp, offset);
        let record_offset = self.write(record)?;
        self.publish(record);
        Ok(record_offset)
    }

    /// Append `record` and move the commit metadata to it, leaving the
    /// in-memory index untouched. Lookups only see the record after
    /// [`RootIndex::publish`].
    pub fn write(&self, record: RootIndexRecord) -> Result<u64> {
        let record_offset = self.storage.append(&record.encode(self.storage.byte_order()))?;
        self.storage.commit_metadata(record_offset, record.version)?;
        debug!(
            version = record.version,
            timestamp = record.timestamp,
            root = record.offset,
            record_offset,
            "wrote root record"
        );
        Ok(record_offset)
    }

    /// Make a written record visible to lookups. A record for a version
    /// already present replaces it and everything after it.
    pub fn publish(&mut self, record: RootIndexRecord) {
        self.last = record;
        self.history.retain(|r| r.version < record.version);
        self.history.push(record);
    }

    /// Root offset if `version` is the last appended version, else 0.
    pub fn version_offset(&self, version: Version) -> u64 {
        if self.last.version == version {
            self.last.offset
        } else {
            0
        }
    }

    /// Root offset if `timestamp` is the last appended timestamp, else 0.
    pub fn timestamp_offset(&self, timestamp: Timestamp) -> u64 {
        if self.last.timestamp == timestamp {
            self.last.offset
        } else {
            0
        }
    }

    /// Any recorded version, exact match.
    pub fn find_version(&self, version: Version) -> Option<RootIndexRecord> {
        self.history
            .binary_search_by_key(&version, |r| r.version)
            .ok()
            .map(|i| self.history[i])
            .or_else(|| (self.is_committed() && self.last.version == version).then_some(self.last))
    }

    /// Newest version committed at or before `timestamp`.
    pub fn find_timestamp(&self, timestamp: Timestamp) -> Option<RootIndexRecord> {
        self.history
            .iter()
            .rev()
            .find(|r| r.timestamp <= timestamp)
            .copied()
            .or_else(|| {
                (self.history.is_empty() && self.is_committed() && self.last.timestamp <= timestamp)
                    .then_some(self.last)
            })
    }

    /// The most recently appended (or constructed) triple.
    pub fn last(&self) -> RootIndexRecord {
        self.last
    }

    /// Every record known to this index, oldest first.
    pub fn history(&self) -> &[RootIndexRecord] {
        &self.history
    }

    /// Flush the storage.
    pub fn commit(&self) -> Result<()> {
        self.storage.flush()
    }

    fn is_committed(&self) -> bool {
        self.last.version != INITIAL_VERSION
    }
}
