//! On-page layout of B+Tree nodes.
//!
//! ```text
//! ┌───────────┬─────────┬──────────┬────────────┬───────────┬──────────────┬─────────┐
//! │ Magic (4B)│ Kind(1B)│ Rsvd(1B) │ Keys (2B)  │ CRC (4B)  │ Payload (4B) │ payload │
//! └───────────┴─────────┴──────────┴────────────┴───────────┴──────────────┴─────────┘
//!
//! leaf payload:     Keys × [key_len(2B)][val_len(2B)][key][value]
//! non-leaf payload: [child_0(8B)] Keys × [key_len(2B)][key][child(8B)]
//! ```
//!
//! Integers use the storage's byte order. The CRC covers the whole page
//! except the CRC field itself, zero padding included, so a torn or
//! overwritten page never decodes.

use bytes::{BufMut, Bytes};

use crate::btree::node::{BTreeNode, Leaf, NodeKind, NodeState, NonLeaf};
use crate::codec::ByteOrder;
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::ChildRef;

/// "CWBT"
pub const PAGE_MAGIC: u32 = 0x4357_4254;

pub const HEADER_SIZE: usize = 16;
pub const LEAF_ENTRY_OVERHEAD: usize = 2 + 2;
pub const NON_LEAF_CHILD_SIZE: usize = 8;
pub const NON_LEAF_ENTRY_OVERHEAD: usize = 2 + NON_LEAF_CHILD_SIZE;

const KIND_LEAF: u8 = 1;
const KIND_NON_LEAF: u8 = 2;

const CRC_START: usize = 8;
const CRC_END: usize = 12;

/// Serialize `kind` into `page`, which must be zeroed and page sized.
/// Every child of a non-leaf must already be persisted.
pub fn encode_into(kind: &NodeKind, order: ByteOrder, page: &mut [u8]) -> Result<()> {
    let payload = encode_payload(kind, order)?;
    if HEADER_SIZE + payload.len() > page.len() {
        return Err(Error::EntryTooLarge {
            size: HEADER_SIZE + payload.len(),
            max: page.len(),
        });
    }
    page[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);

    let (tag, count) = match kind {
        NodeKind::Leaf(leaf) => (KIND_LEAF, leaf.keys.len()),
        NodeKind::NonLeaf(node) => (KIND_NON_LEAF, node.keys.len()),
    };

    let mut header = &mut page[..HEADER_SIZE];
    order.put_u32(&mut header, PAGE_MAGIC);
    header.put_u8(tag);
    header.put_u8(0);
    order.put_u16(&mut header, count as u16);
    order.put_u32(&mut header, 0);
    order.put_u32(&mut header, payload.len() as u32);

    let crc = page_crc(page);
    let mut slot = &mut page[CRC_START..CRC_END];
    order.put_u32(&mut slot, crc);
    Ok(())
}

fn encode_payload(kind: &NodeKind, order: ByteOrder) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match kind {
        NodeKind::Leaf(leaf) => {
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                order.put_u16(&mut buf, key.len() as u16);
                order.put_u16(&mut buf, value.len() as u16);
                buf.extend_from_slice(key);
                buf.extend_from_slice(value);
            }
        }
        NodeKind::NonLeaf(node) => {
            order.put_u64(&mut buf, persisted(&node.children[0])?);
            for (key, child) in node.keys.iter().zip(&node.children[1..]) {
                order.put_u16(&mut buf, key.len() as u16);
                buf.extend_from_slice(key);
                order.put_u64(&mut buf, persisted(child)?);
            }
        }
    }
    Ok(buf)
}

fn persisted(child: &ChildRef) -> Result<u64> {
    child
        .offset()
        .ok_or_else(|| Error::Corruption("non-leaf references an unpersisted child".into()))
}

fn page_crc(page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..CRC_START]);
    hasher.update(&page[CRC_END..]);
    hasher.finalize()
}

/// Whether `data` is a complete, intact node page.
pub fn is_node_page(data: &[u8], order: ByteOrder) -> bool {
    data.len() >= HEADER_SIZE
        && order.read_u32(&data[0..4]).ok() == Some(PAGE_MAGIC)
        && order.read_u32(&data[CRC_START..CRC_END]).ok() == Some(page_crc(data))
}

/// Rebuild the node stored in `page`, which was read from `offset`.
///
/// Keys and values are slices of `page`; nothing is copied.
pub fn decode(page: Bytes, order: ByteOrder, offset: u64) -> Result<BTreeNode> {
    let corrupt = |what: &str| Error::Corruption(format!("page at {offset}: {what}"));

    if page.len() < HEADER_SIZE {
        return Err(corrupt("shorter than header"));
    }
    if order.read_u32(&page[0..4])? != PAGE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    if order.read_u32(&page[CRC_START..CRC_END])? != page_crc(&page) {
        return Err(corrupt("CRC mismatch"));
    }

    let tag = page[4];
    let count = order.read_u16(&page[6..8])? as usize;
    let payload_len = order.read_u32(&page[12..16])? as usize;
    let end = HEADER_SIZE + payload_len;
    if end > page.len() {
        return Err(corrupt("payload length exceeds page"));
    }

    let mut reader = PageReader {
        page: &page,
        pos: HEADER_SIZE,
        end,
        order,
    };

    let kind = match tag {
        KIND_LEAF => {
            let mut leaf = Leaf {
                keys: Vec::with_capacity(count),
                values: Vec::with_capacity(count),
            };
            for _ in 0..count {
                let key_len = reader.u16().ok_or_else(|| corrupt("truncated entry"))? as usize;
                let val_len = reader.u16().ok_or_else(|| corrupt("truncated entry"))? as usize;
                leaf.keys.push(reader.slice(key_len).ok_or_else(|| corrupt("truncated key"))?);
                leaf.values.push(reader.slice(val_len).ok_or_else(|| corrupt("truncated value"))?);
            }
            NodeKind::Leaf(leaf)
        }
        KIND_NON_LEAF => {
            let mut keys = Vec::with_capacity(count);
            let mut children = Vec::with_capacity(count + 1);
            children.push(ChildRef::Persisted(
                reader.u64().ok_or_else(|| corrupt("truncated child"))?,
            ));
            for _ in 0..count {
                let key_len = reader.u16().ok_or_else(|| corrupt("truncated entry"))? as usize;
                keys.push(reader.slice(key_len).ok_or_else(|| corrupt("truncated key"))?);
                children.push(ChildRef::Persisted(
                    reader.u64().ok_or_else(|| corrupt("truncated child"))?,
                ));
            }
            NodeKind::NonLeaf(NonLeaf { keys, children })
        }
        other => return Err(corrupt(&format!("unknown node kind {other}"))),
    };

    Ok(BTreeNode {
        state: NodeState::Committed(offset),
        kind,
    })
}

/// Read and decode the node page at `offset`.
pub fn load<S: Storage + ?Sized>(storage: &S, offset: u64) -> Result<BTreeNode> {
    let page = storage.read(offset, storage.page_size())?;
    decode(page, storage.byte_order(), offset)
}

struct PageReader<'a> {
    page: &'a Bytes,
    pos: usize,
    end: usize,
    order: ByteOrder,
}

impl PageReader<'_> {
    fn take(&mut self, n: usize) -> Option<std::ops::Range<usize>> {
        let start = self.pos;
        let stop = start.checked_add(n)?;
        if stop > self.end {
            return None;
        }
        self.pos = stop;
        Some(start..stop)
    }

    fn u16(&mut self) -> Option<u16> {
        let range = self.take(2)?;
        self.order.read_u16(&self.page[range]).ok()
    }

    fn u64(&mut self) -> Option<u64> {
        let range = self.take(8)?;
        self.order.read_u64(&self.page[range]).ok()
    }

    fn slice(&mut self, n: usize) -> Option<Bytes> {
        let range = self.take(n)?;
        Some(self.page.slice(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    const PAGE: usize = 256;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn leaf() -> NodeKind {
        let mut leaf = Leaf::new();
        leaf.insert(b("apple"), b("red"));
        leaf.insert(b("banana"), b("yellow"));
        leaf.insert(b("cherry"), b(""));
        NodeKind::Leaf(leaf)
    }

    fn encode(kind: &NodeKind, order: ByteOrder) -> Bytes {
        let mut page = BytesMut::zeroed(PAGE);
        encode_into(kind, order, &mut page).unwrap();
        page.freeze()
    }

    #[test]
    fn leaf_roundtrip_both_orders() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            let page = encode(&leaf(), order);
            assert!(is_node_page(&page, order));
            let node = decode(page, order, 4096).unwrap();
            assert_eq!(node.offset(), Some(4096));
            match node.kind() {
                NodeKind::Leaf(l) => {
                    assert_eq!(l.keys(), &[b("apple"), b("banana"), b("cherry")]);
                    assert_eq!(l.values(), &[b("red"), b("yellow"), b("")]);
                }
                NodeKind::NonLeaf(_) => panic!("expected leaf"),
            }
        }
    }

    #[test]
    fn non_leaf_roundtrip() {
        let kind = NodeKind::NonLeaf(NonLeaf::new(
            vec![b("g"), b("p")],
            vec![
                ChildRef::Persisted(0),
                ChildRef::Persisted(256),
                ChildRef::Persisted(512),
            ],
        ));
        let node = decode(encode(&kind, ByteOrder::LittleEndian), ByteOrder::LittleEndian, 0).unwrap();
        match node.kind() {
            NodeKind::NonLeaf(n) => {
                assert_eq!(n.keys(), &[b("g"), b("p")]);
                assert_eq!(
                    n.children(),
                    &[
                        ChildRef::Persisted(0),
                        ChildRef::Persisted(256),
                        ChildRef::Persisted(512)
                    ]
                );
            }
            NodeKind::Leaf(_) => panic!("expected non-leaf"),
        }
    }

    #[test]
    fn encoded_len_matches_payload() {
        let kind = leaf();
        let page = encode(&kind, ByteOrder::LittleEndian);
        let payload_len = ByteOrder::LittleEndian.read_u32(&page[12..16]).unwrap() as usize;
        assert_eq!(kind.encoded_len(), HEADER_SIZE + payload_len);
    }

    #[test]
    fn unpersisted_child_is_rejected() {
        let kind = NodeKind::NonLeaf(NonLeaf::new(
            vec![b("m")],
            vec![ChildRef::Persisted(0), ChildRef::Unpersisted(crate::types::NodeId(7))],
        ));
        let mut page = BytesMut::zeroed(PAGE);
        assert!(encode_into(&kind, ByteOrder::LittleEndian, &mut page).is_err());
    }

    #[test]
    fn flipped_bit_detected() {
        let mut page = BytesMut::from(&encode(&leaf(), ByteOrder::LittleEndian)[..]);
        page[HEADER_SIZE + 3] ^= 0x01;
        assert!(!is_node_page(&page, ByteOrder::LittleEndian));
        assert!(matches!(
            decode(page.freeze(), ByteOrder::LittleEndian, 0),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn wrong_byte_order_rejected() {
        let page = encode(&leaf(), ByteOrder::LittleEndian);
        assert!(!is_node_page(&page, ByteOrder::BigEndian));
    }

    #[test]
    fn oversized_node_rejected() {
        let mut leaf = Leaf::new();
        for i in 0..40 {
            leaf.insert(Bytes::from(format!("key_{i:04}")), Bytes::from(vec![0u8; 8]));
        }
        let mut page = BytesMut::zeroed(PAGE);
        assert!(matches!(
            encode_into(&NodeKind::Leaf(leaf), ByteOrder::LittleEndian, &mut page),
            Err(Error::EntryTooLarge { .. })
        ));
    }

    #[test]
    fn record_sized_bytes_are_not_a_page() {
        assert!(!is_node_page(&[0u8; 24], ByteOrder::LittleEndian));
    }
}
