//! Leaf page operations.
//!
//! A leaf stores a dense, key-sorted array of `(K, V)` data entries after
//! the shared header, and chains to its right neighbor through
//! `next_page_id`.

use super::{inc_size, page_id, read_i32, set_size, size, write_i32, LEAF_HEADER_LEN,
            NEXT_PAGE_ID_OFFSET};
use crate::codec::{KeyComparator, Storable};
use std::cmp::Ordering;
use oxbow_common::types::PageId;

fn entry_len<K: Storable, V: Storable>() -> usize {
    K::LEN + V::LEN
}

fn entry_offset<K: Storable, V: Storable>(index: usize) -> usize {
    LEAF_HEADER_LEN + index * entry_len::<K, V>()
}

/// Next leaf in key order, `INVALID_PAGE_ID` at the end of the chain.
pub fn next_page_id(data: &[u8]) -> PageId {
    read_i32(data, NEXT_PAGE_ID_OFFSET)
}

/// Sets the next leaf in key order.
pub fn set_next_page_id(data: &mut [u8], next: PageId) {
    write_i32(data, NEXT_PAGE_ID_OFFSET, next);
}

/// Key at `index`.
pub fn key_at<K: Storable, V: Storable>(data: &[u8], index: usize) -> K {
    debug_assert!((index as i32) < size(data));
    K::read_from(&data[entry_offset::<K, V>(index)..])
}

/// Value at `index`.
pub fn value_at<K: Storable, V: Storable>(data: &[u8], index: usize) -> V {
    debug_assert!((index as i32) < size(data));
    V::read_from(&data[entry_offset::<K, V>(index) + K::LEN..])
}

/// Entry at `index`.
pub fn entry_at<K: Storable, V: Storable>(data: &[u8], index: usize) -> (K, V) {
    (key_at::<K, V>(data, index), value_at::<K, V>(data, index))
}

fn write_entry<K: Storable, V: Storable>(data: &mut [u8], index: usize, key: &K, value: &V) {
    let off = entry_offset::<K, V>(index);
    key.write_to(&mut data[off..]);
    value.write_to(&mut data[off + K::LEN..]);
}

/// First index whose key is greater than or equal to `key`; `size` when all
/// keys are smaller.
pub fn key_index<K, V, C>(data: &[u8], key: &K, cmp: &C) -> usize
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    let mut lo = 0i32;
    let mut hi = size(data) - 1;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.compare(&key_at::<K, V>(data, mid as usize), key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }
    lo as usize
}

/// Looks up `key`, returning its value if present.
pub fn lookup<K, V, C>(data: &[u8], key: &K, cmp: &C) -> Option<V>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    let index = key_index::<K, V, C>(data, key, cmp);
    if (index as i32) < size(data)
        && cmp.compare(&key_at::<K, V>(data, index), key) == Ordering::Equal
    {
        Some(value_at::<K, V>(data, index))
    } else {
        None
    }
}

/// Inserts `(key, value)` at its sorted position. The caller has already
/// ruled out duplicates. Returns the size after insertion, which may
/// transiently exceed `max_size` until the caller splits.
pub fn insert<K, V, C>(data: &mut [u8], key: &K, value: &V, cmp: &C) -> i32
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    let index = key_index::<K, V, C>(data, key, cmp);
    let count = size(data) as usize;
    let stride = entry_len::<K, V>();
    let start = entry_offset::<K, V>(index);
    let end = entry_offset::<K, V>(count);
    data.copy_within(start..end, start + stride);
    write_entry(data, index, key, value);
    inc_size(data, 1);
    size(data)
}

/// Removes `key` if present, keeping entries dense. Returns the size after
/// the call.
pub fn remove<K, V, C>(data: &mut [u8], key: &K, cmp: &C) -> i32
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    let count = size(data);
    let index = key_index::<K, V, C>(data, key, cmp);
    if index as i32 >= count || cmp.compare(&key_at::<K, V>(data, index), key) != Ordering::Equal {
        return count;
    }
    let stride = entry_len::<K, V>();
    let start = entry_offset::<K, V>(index);
    let end = entry_offset::<K, V>(count as usize);
    data.copy_within(start + stride..end, start);
    inc_size(data, -1);
    count - 1
}

/// Moves the upper half of `src`'s entries into the freshly formatted
/// `dst`, splicing `dst` into the leaf chain after `src`.
pub fn move_half_to<K: Storable, V: Storable>(src: &mut [u8], dst: &mut [u8]) {
    let count = size(src) as usize;
    let split = count / 2;
    let stride = entry_len::<K, V>();

    let from = entry_offset::<K, V>(split);
    let to = entry_offset::<K, V>(count);
    dst[LEAF_HEADER_LEN..LEAF_HEADER_LEN + (count - split) * stride]
        .copy_from_slice(&src[from..to]);

    set_next_page_id(dst, next_page_id(src));
    set_next_page_id(src, page_id(dst));

    set_size(src, split as i32);
    set_size(dst, (count - split) as i32);
}

/// Moves every entry of `src` onto the end of `dst` (its left neighbor) and
/// unlinks `src` from the chain.
pub fn move_all_to<K: Storable, V: Storable>(src: &mut [u8], dst: &mut [u8]) {
    let src_count = size(src) as usize;
    let dst_count = size(dst) as usize;
    let stride = entry_len::<K, V>();

    let from = entry_offset::<K, V>(0);
    let to = entry_offset::<K, V>(src_count);
    let dst_start = entry_offset::<K, V>(dst_count);
    dst[dst_start..dst_start + src_count * stride].copy_from_slice(&src[from..to]);

    set_next_page_id(dst, next_page_id(src));
    inc_size(dst, src_count as i32);
    set_size(src, 0);
}

/// Moves `src`'s first entry to the end of `dst` (its left neighbor).
pub fn move_first_to_end_of<K: Storable, V: Storable>(src: &mut [u8], dst: &mut [u8]) {
    let (key, value) = entry_at::<K, V>(src, 0);
    let count = size(src) as usize;
    let start = entry_offset::<K, V>(0);
    let end = entry_offset::<K, V>(count);
    src.copy_within(start + entry_len::<K, V>()..end, start);
    inc_size(src, -1);

    let dst_count = size(dst) as usize;
    write_entry(dst, dst_count, &key, &value);
    inc_size(dst, 1);
}

/// Moves `src`'s last entry to the front of `dst` (its right neighbor).
pub fn move_last_to_front_of<K: Storable, V: Storable>(src: &mut [u8], dst: &mut [u8]) {
    let src_count = size(src) as usize;
    let (key, value) = entry_at::<K, V>(src, src_count - 1);
    inc_size(src, -1);

    let dst_count = size(dst) as usize;
    let start = entry_offset::<K, V>(0);
    let end = entry_offset::<K, V>(dst_count);
    dst.copy_within(start..end, start + entry_len::<K, V>());
    write_entry(dst, 0, &key, &value);
    inc_size(dst, 1);
}
