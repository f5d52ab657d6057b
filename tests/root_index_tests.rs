// RootIndex tests
// Version → root log: lookups, history and recovery by scanning the storage.

use std::sync::Arc;

use cow_btree_engine::types::INITIAL_VERSION;
use cow_btree_engine::{
    BTree, ByteOrder, Error, FileStorage, MemoryStorage, Options, RootIndex, RootIndexRecord,
    Storage,
};
use tempfile::tempdir;

fn memory(options: &Options) -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new(options).unwrap())
}

// =============================================================================
// Test 1: A constructed triple answers exact lookups, anything else is 0
// =============================================================================
#[test]
fn constructed_triple_lookups() {
    let storage = memory(&Options::default());
    let mut index = RootIndex::new(Arc::clone(&storage), 1, 1237123571, 12312313);

    assert_eq!(index.version_offset(1), 12312313);
    assert_eq!(index.timestamp_offset(1237123571), 12312313);

    // Appending the same triple keeps both lookups on it.
    index.append(1, 1237123571, 12312313).unwrap();
    assert_eq!(index.version_offset(1), 12312313);
    assert_eq!(index.timestamp_offset(1237123571), 12312313);
    assert_eq!(index.find_version(1).unwrap().offset, 12312313);
    assert_eq!(storage.append_version(), 1);

    assert_eq!(index.version_offset(2), 0);
    assert_eq!(index.timestamp_offset(1237123570), 0);
}

// =============================================================================
// Test 2: Records round-trip through both byte orders
// =============================================================================
#[test]
fn record_roundtrip_both_orders() {
    let record = RootIndexRecord::new(1, 1237123571, 12312313);
    for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
        let encoded = record.encode(order);
        assert_eq!(encoded.len(), RootIndexRecord::SIZE);
        assert_eq!(RootIndexRecord::decode(&encoded, order).unwrap(), record);
    }
}

// =============================================================================
// Test 3: Append writes the record and moves the commit metadata
// =============================================================================
#[test]
fn append_moves_commit_metadata() {
    let storage = memory(&Options::new().with_page_size(256));
    let mut index = RootIndex::new(Arc::clone(&storage), INITIAL_VERSION, 0, 0);

    storage.append(&[0u8; 256]).unwrap();
    let record_offset = index.append(1, 1000, 0).unwrap();

    assert_eq!(record_offset, 256);
    assert_eq!(storage.last_persisted_offset(), Some(256));
    assert_eq!(storage.append_version(), 1);
    assert_eq!(index.last(), RootIndexRecord::new(1, 1000, 0));
    assert_eq!(index.version_offset(1), 0);
    assert_eq!(index.timestamp_offset(1000), 0);

    let bytes = storage.read(record_offset, RootIndexRecord::SIZE).unwrap();
    let stored = RootIndexRecord::decode(&bytes, storage.byte_order()).unwrap();
    assert_eq!(stored, index.last());
}

// =============================================================================
// Test 4: Historical lookups by version and by timestamp
// =============================================================================
#[test]
fn find_version_and_timestamp() {
    let storage = memory(&Options::default());
    let mut index = RootIndex::new(Arc::clone(&storage), INITIAL_VERSION, 0, 0);
    for v in 1..=5u64 {
        index.append(v, v * 100, v * 4096).unwrap();
    }

    assert_eq!(index.history().len(), 5);
    assert_eq!(index.find_version(3).unwrap().offset, 3 * 4096);
    assert!(index.find_version(6).is_none());
    assert!(index.find_version(INITIAL_VERSION).is_none());

    assert_eq!(index.find_timestamp(250).unwrap().version, 2);
    assert_eq!(index.find_timestamp(300).unwrap().version, 3);
    assert_eq!(index.find_timestamp(u64::MAX).unwrap().version, 5);
    assert!(index.find_timestamp(99).is_none());
}

// =============================================================================
// Test 5: Recovering an untouched storage yields the bootstrap triple
// =============================================================================
#[test]
fn recover_empty_storage() {
    let index = RootIndex::recover(memory(&Options::default())).unwrap();
    assert_eq!(index.last(), RootIndexRecord::new(INITIAL_VERSION, 0, 0));
    assert!(index.history().is_empty());
    assert!(index.find_version(1).is_none());
}

// =============================================================================
// Test 6: Recovery skips node pages and finds every record
// =============================================================================
#[test]
fn recover_finds_records_between_pages() {
    let dir = tempdir().unwrap();
    let options = Options::new().with_page_size(256).with_max_keys_per_node(4);

    {
        let storage = Arc::new(FileStorage::open(dir.path(), &options).unwrap());
        let mut tree = BTree::open(storage, &options).unwrap();
        for batch in 0..4u64 {
            for i in 0..20 {
                let key = format!("{:03}", batch * 20 + i);
                tree.put(key.as_bytes(), b"v").unwrap();
            }
            tree.commit_at(1000 + batch).unwrap();
        }
        tree.close().unwrap();
    }

    let storage = Arc::new(FileStorage::open(dir.path(), &options).unwrap());
    let index = RootIndex::recover(storage).unwrap();

    let versions: Vec<u64> = index.history().iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert_eq!(index.last().version, 4);
    assert_eq!(index.last().timestamp, 1003);
    assert_eq!(index.find_timestamp(1001).unwrap().version, 2);
}

// =============================================================================
// Test 7: A record left behind by a failed commit is superseded
// =============================================================================
#[test]
fn recover_supersedes_orphaned_record() {
    let storage = memory(&Options::new().with_page_size(256));
    let mut index = RootIndex::new(Arc::clone(&storage), INITIAL_VERSION, 0, 0);
    index.append(1, 10, 111).unwrap();

    // Version 2's record reaches storage but its metadata write never does.
    let orphan = RootIndexRecord::new(2, 20, 222);
    storage.append(&orphan.encode(storage.byte_order())).unwrap();

    index.append(2, 30, 333).unwrap();

    let recovered = RootIndex::recover(Arc::clone(&storage)).unwrap();
    assert_eq!(
        recovered.history(),
        &[RootIndexRecord::new(1, 10, 111), RootIndexRecord::new(2, 30, 333)]
    );
    assert_eq!(recovered.find_version(2).unwrap().offset, 333);
}

// =============================================================================
// Test 8: Metadata naming a version the log never reached is corruption
// =============================================================================
#[test]
fn recover_detects_version_mismatch() {
    let storage = memory(&Options::default());
    let record = RootIndexRecord::new(1, 10, 0);
    let offset = storage.append(&record.encode(storage.byte_order())).unwrap();
    storage.commit_metadata(offset, 7).unwrap();

    assert!(matches!(
        RootIndex::recover(storage),
        Err(Error::Corruption(_))
    ));
}

// =============================================================================
// Test 9: A written record stays out of lookups until it is published
// =============================================================================
#[test]
fn written_record_hidden_until_published() {
    let storage = memory(&Options::default());
    let mut index = RootIndex::new(Arc::clone(&storage), INITIAL_VERSION, 0, 0);
    index.append(1, 100, 4096).unwrap();

    let record = RootIndexRecord::new(2, 200, 8192);
    let record_offset = index.write(record).unwrap();
    assert_eq!(storage.last_persisted_offset(), Some(record_offset));
    assert_eq!(storage.append_version(), 2);

    assert_eq!(index.last().version, 1);
    assert!(index.find_version(2).is_none());
    assert_eq!(index.find_timestamp(u64::MAX).unwrap().version, 1);
    assert_eq!(index.version_offset(2), 0);

    index.publish(record);
    assert_eq!(index.last(), record);
    assert_eq!(index.find_version(2).unwrap().offset, 8192);
    assert_eq!(index.find_timestamp(u64::MAX).unwrap().version, 2);
}
