//! Binary search over sorted keys with the insertion point folded into the
//! result.
//!
//! ```text
//! found at i          →  i
//! absent, would go at p  →  -(p + 1)
//! ```
//!
//! The encoding is never zero for a miss, so `result >= 0` alone tells a hit
//! from a miss. Callers that insert recover the position with
//! [`insertion_point`].

use std::cmp::Ordering;

/// Search `keys` (sorted, distinct) for `key`.
pub fn search<K: AsRef<[u8]>>(keys: &[K], key: &[u8]) -> i64 {
    let mut low = 0usize;
    let mut high = keys.len();

    while low < high {
        let mid = low + (high - low) / 2;
        match keys[mid].as_ref().cmp(key) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return mid as i64,
        }
    }

    -(low as i64 + 1)
}

/// Recover the insertion point from a negative [`search`] result.
#[inline]
pub fn insertion_point(result: i64) -> usize {
    debug_assert!(result < 0);
    (-result - 1) as usize
}
