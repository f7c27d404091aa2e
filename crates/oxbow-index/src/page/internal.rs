//! Internal page operations.
//!
//! An internal node stores a dense array of `(K, child_page_id)` pairs. The
//! child at index 0 covers keys below `key[1]`; its key slot never
//! participates in lookups. Merges and rotations take the separator between
//! the two nodes from the caller, which reads it out of the write-latched
//! parent.

use super::{inc_size, read_i32, set_size, size, INTERNAL_HEADER_LEN};
use crate::codec::{KeyComparator, Storable};
use std::cmp::Ordering;
use oxbow_common::types::PageId;

fn entry_len<K: Storable>() -> usize {
    K::LEN + 4
}

fn entry_offset<K: Storable>(index: usize) -> usize {
    INTERNAL_HEADER_LEN + index * entry_len::<K>()
}

/// Key at `index`. Index 0 is the separator copy, not a search key.
pub fn key_at<K: Storable>(data: &[u8], index: usize) -> K {
    debug_assert!((index as i32) < size(data));
    K::read_from(&data[entry_offset::<K>(index)..])
}

/// Overwrites the key at `index`.
pub fn set_key_at<K: Storable>(data: &mut [u8], index: usize, key: &K) {
    debug_assert!((index as i32) < size(data));
    key.write_to(&mut data[entry_offset::<K>(index)..]);
}

/// Child page id at `index`.
pub fn child_at<K: Storable>(data: &[u8], index: usize) -> PageId {
    debug_assert!((index as i32) < size(data));
    read_i32(data, entry_offset::<K>(index) + K::LEN)
}

fn write_entry<K: Storable>(data: &mut [u8], index: usize, key: &K, child: PageId) {
    let off = entry_offset::<K>(index);
    key.write_to(&mut data[off..]);
    data[off + K::LEN..off + K::LEN + 4].copy_from_slice(&child.to_le_bytes());
}

/// Index of the entry pointing at `child`, if any.
pub fn child_index<K: Storable>(data: &[u8], child: PageId) -> Option<usize> {
    (0..size(data) as usize).find(|&i| child_at::<K>(data, i) == child)
}

/// Child to descend into for `key`: the child of the last separator at
/// index 1.. that is less than or equal to `key`, or child 0 when `key`
/// sorts below every separator.
pub fn lookup<K, C>(data: &[u8], key: &K, cmp: &C) -> PageId
where
    K: Storable,
    C: KeyComparator<K>,
{
    let count = size(data);
    debug_assert!(count > 1);
    let mut lo = 1i32;
    let mut hi = count - 1;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.compare(&key_at::<K>(data, mid as usize), key) != Ordering::Greater {
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }
    child_at::<K>(data, (lo - 1) as usize)
}

/// Fills a fresh root after the old root split: `left` below `key`, `right`
/// at and above it.
pub fn populate_new_root<K: Storable>(data: &mut [u8], left: PageId, key: &K, right: PageId) {
    set_size(data, 2);
    let off = entry_offset::<K>(0);
    data[off + K::LEN..off + K::LEN + 4].copy_from_slice(&left.to_le_bytes());
    write_entry(data, 1, key, right);
}

/// Inserts `(key, new_child)` immediately after the entry whose child is
/// `old_child`. Returns the size after insertion, which may transiently
/// exceed `max_size` until the caller splits.
pub fn insert_after<K: Storable>(
    data: &mut [u8],
    old_child: PageId,
    key: &K,
    new_child: PageId,
) -> i32 {
    let index = child_index::<K>(data, old_child)
        .unwrap_or_else(|| panic!("child {old_child} missing from internal page"))
        + 1;
    let count = size(data) as usize;
    let stride = entry_len::<K>();
    let start = entry_offset::<K>(index);
    let end = entry_offset::<K>(count);
    data.copy_within(start..end, start + stride);
    write_entry(data, index, key, new_child);
    inc_size(data, 1);
    size(data)
}

/// Removes the entry at `index`, keeping entries dense.
pub fn remove_at<K: Storable>(data: &mut [u8], index: usize) {
    let count = size(data) as usize;
    debug_assert!(index < count);
    let stride = entry_len::<K>();
    let start = entry_offset::<K>(index);
    let end = entry_offset::<K>(count);
    data.copy_within(start + stride..end, start);
    inc_size(data, -1);
}

/// Removes and returns the only remaining child. Called only while
/// collapsing the root.
pub fn remove_and_return_only_child<K: Storable>(data: &mut [u8]) -> PageId {
    debug_assert_eq!(size(data), 1);
    let child = child_at::<K>(data, 0);
    inc_size(data, -1);
    child
}

/// Moves the upper half of `src`'s entries into the freshly formatted
/// `dst`. Returns the moved child ids so the caller can re-parent them;
/// `dst`'s key 0 ends up holding the separator the caller pushes upward.
pub fn move_half_to<K: Storable>(src: &mut [u8], dst: &mut [u8]) -> Vec<PageId> {
    let count = size(src) as usize;
    let split = count / 2;
    let stride = entry_len::<K>();

    let from = entry_offset::<K>(split);
    let to = entry_offset::<K>(count);
    dst[INTERNAL_HEADER_LEN..INTERNAL_HEADER_LEN + (count - split) * stride]
        .copy_from_slice(&src[from..to]);

    set_size(src, split as i32);
    set_size(dst, (count - split) as i32);

    (0..count - split).map(|i| child_at::<K>(dst, i)).collect()
}

/// Moves every entry of `src` onto the end of `dst` (its left neighbor),
/// first lowering the parent's separator `middle_key` into `src`'s key 0 so
/// the merged array stays ordered. Returns the moved child ids.
pub fn move_all_to<K: Storable>(src: &mut [u8], dst: &mut [u8], middle_key: &K) -> Vec<PageId> {
    set_key_at::<K>(src, 0, middle_key);

    let src_count = size(src) as usize;
    let dst_count = size(dst) as usize;
    let stride = entry_len::<K>();

    let from = entry_offset::<K>(0);
    let to = entry_offset::<K>(src_count);
    let dst_start = entry_offset::<K>(dst_count);
    dst[dst_start..dst_start + src_count * stride].copy_from_slice(&src[from..to]);

    inc_size(dst, src_count as i32);
    set_size(src, 0);

    (dst_count..dst_count + src_count)
        .map(|i| child_at::<K>(dst, i))
        .collect()
}

/// Rotates `src`'s first child down to the end of `dst` (its left
/// neighbor). `separator` is the parent's key between `dst` and `src`: it
/// becomes the key of the rotated child, and `src`'s old `key[1]` (left at
/// index 0 by the shift) is the parent's replacement separator. Returns the
/// moved child id.
pub fn move_first_to_end_of<K: Storable>(src: &mut [u8], dst: &mut [u8], separator: &K) -> PageId {
    let moved_child = child_at::<K>(src, 0);

    let count = size(src) as usize;
    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(count);
    src.copy_within(start + entry_len::<K>()..end, start);
    inc_size(src, -1);

    let dst_count = size(dst) as usize;
    write_entry(dst, dst_count, separator, moved_child);
    inc_size(dst, 1);
    moved_child
}

/// Rotates `src`'s last child down to the front of `dst` (its right
/// neighbor). `separator` is the parent's key between `src` and `dst`: it
/// becomes the key of `dst`'s previous first child at index 1, while the
/// moved key lands at index 0 and is the parent's replacement separator.
/// Returns the moved child id.
pub fn move_last_to_front_of<K: Storable>(src: &mut [u8], dst: &mut [u8], separator: &K) -> PageId {
    let src_count = size(src) as usize;
    let moved_key = key_at::<K>(src, src_count - 1);
    let moved_child = child_at::<K>(src, src_count - 1);
    inc_size(src, -1);

    let dst_count = size(dst) as usize;
    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(dst_count);
    dst.copy_within(start..end, start + entry_len::<K>());
    inc_size(dst, 1);
    write_entry(dst, 0, &moved_key, moved_child);
    set_key_at::<K>(dst, 1, separator);
    moved_child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OrdComparator;
    use crate::page::init_internal;
    use oxbow_common::types::PAGE_SIZE;

    const CMP: OrdComparator = OrdComparator;

    /// Builds an internal page: children[0], then (keys[i], children[i+1]).
    fn internal_with(keys: &[i64], children: &[PageId]) -> [u8; PAGE_SIZE] {
        assert_eq!(children.len(), keys.len() + 1);
        let mut data = [0u8; PAGE_SIZE];
        init_internal(&mut data, 1, 99, 64);
        set_size(&mut data, children.len() as i32);
        let off = entry_offset::<i64>(0);
        data[off + 8..off + 12].copy_from_slice(&children[0].to_le_bytes());
        for (i, (&k, &c)) in keys.iter().zip(&children[1..]).enumerate() {
            write_entry(&mut data, i + 1, &k, c);
        }
        data
    }

    #[test]
    fn test_internal_lookup() {
        let data = internal_with(&[10, 20, 30], &[100, 110, 120, 130]);

        assert_eq!(lookup::<i64, _>(&data, &5, &CMP), 100);
        assert_eq!(lookup::<i64, _>(&data, &10, &CMP), 110);
        assert_eq!(lookup::<i64, _>(&data, &15, &CMP), 110);
        assert_eq!(lookup::<i64, _>(&data, &29, &CMP), 120);
        assert_eq!(lookup::<i64, _>(&data, &30, &CMP), 130);
        assert_eq!(lookup::<i64, _>(&data, &99, &CMP), 130);
    }

    #[test]
    fn test_internal_child_index() {
        let data = internal_with(&[10], &[100, 110]);

        assert_eq!(child_index::<i64>(&data, 100), Some(0));
        assert_eq!(child_index::<i64>(&data, 110), Some(1));
        assert_eq!(child_index::<i64>(&data, 999), None);
    }

    #[test]
    fn test_internal_populate_new_root() {
        let mut data = [0u8; PAGE_SIZE];
        init_internal(&mut data, 1, -1, 64);
        populate_new_root::<i64>(&mut data, 100, &50, 110);

        assert_eq!(size(&data), 2);
        assert_eq!(child_at::<i64>(&data, 0), 100);
        assert_eq!(key_at::<i64>(&data, 1), 50);
        assert_eq!(child_at::<i64>(&data, 1), 110);
    }

    #[test]
    fn test_internal_insert_after() {
        let mut data = internal_with(&[10, 30], &[100, 110, 130]);

        let new_size = insert_after::<i64>(&mut data, 110, &20, 120);
        assert_eq!(new_size, 4);
        assert_eq!(key_at::<i64>(&data, 2), 20);
        assert_eq!(child_at::<i64>(&data, 2), 120);
        assert_eq!(key_at::<i64>(&data, 3), 30);
        assert_eq!(child_at::<i64>(&data, 3), 130);
    }

    #[test]
    fn test_internal_remove_at() {
        let mut data = internal_with(&[10, 20], &[100, 110, 120]);

        remove_at::<i64>(&mut data, 1);
        assert_eq!(size(&data), 2);
        assert_eq!(child_at::<i64>(&data, 0), 100);
        assert_eq!(key_at::<i64>(&data, 1), 20);
        assert_eq!(child_at::<i64>(&data, 1), 120);
    }

    #[test]
    fn test_internal_move_half() {
        let mut src = internal_with(&[10, 20, 30], &[100, 110, 120, 130]);
        let mut dst = [0u8; PAGE_SIZE];
        init_internal(&mut dst, 2, 99, 64);

        let moved = move_half_to::<i64>(&mut src, &mut dst);

        assert_eq!(size(&src), 2);
        assert_eq!(size(&dst), 2);
        assert_eq!(moved, vec![120, 130]);
        // dst's key 0 carries the separator to push upward
        assert_eq!(key_at::<i64>(&dst, 0), 20);
        assert_eq!(key_at::<i64>(&dst, 1), 30);
    }

    #[test]
    fn test_internal_move_all() {
        let mut src = internal_with(&[40], &[130, 140]);
        let mut dst = internal_with(&[10], &[100, 110]);

        let moved = move_all_to::<i64>(&mut src, &mut dst, &30);

        assert_eq!(size(&dst), 4);
        assert_eq!(size(&src), 0);
        assert_eq!(moved, vec![130, 140]);
        // the lowered separator keeps the merged array ordered
        assert_eq!(key_at::<i64>(&dst, 2), 30);
        assert_eq!(child_at::<i64>(&dst, 2), 130);
        assert_eq!(key_at::<i64>(&dst, 3), 40);
    }

    #[test]
    fn test_internal_rotations() {
        // parent separator between left and right is 25
        let mut left = internal_with(&[10, 20], &[100, 110, 120]);
        let mut right = internal_with(&[30], &[130, 140]);

        let moved = move_first_to_end_of::<i64>(&mut right, &mut left, &25);
        assert_eq!(moved, 130);
        assert_eq!(size(&left), 4);
        assert_eq!(size(&right), 1);
        // the rotated child enters left under the old separator
        assert_eq!(key_at::<i64>(&left, 3), 25);
        assert_eq!(child_at::<i64>(&left, 3), 130);
        // right's old key[1] (30) shifted to index 0: the new separator

        let moved = move_last_to_front_of::<i64>(&mut left, &mut right, &30);
        assert_eq!(moved, 130);
        assert_eq!(size(&left), 3);
        assert_eq!(size(&right), 2);
        assert_eq!(key_at::<i64>(&right, 0), 25);
        assert_eq!(child_at::<i64>(&right, 0), 130);
        // right's previous first child now sits under the old separator
        assert_eq!(key_at::<i64>(&right, 1), 30);
        assert_eq!(child_at::<i64>(&right, 1), 140);
    }
}
