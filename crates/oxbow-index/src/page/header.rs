//! Header page operations.
//!
//! Page 0 is a persistent map from index name to root page id. Layout:
//! a `u32` record count at offset 0, then packed records of a 32-byte
//! zero-padded name and a little-endian `i32` root page id.

use oxbow_common::types::{PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_LEN: usize = NAME_LEN + 4;

/// Maximum number of index records a header page holds.
pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_LEN;

/// Number of records stored.
pub fn record_count(data: &[u8]) -> usize {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
}

fn set_record_count(data: &mut [u8], count: usize) {
    data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_LEN
}

fn name_at(data: &[u8], index: usize) -> &[u8] {
    let off = record_offset(index);
    let name = &data[off..off + NAME_LEN];
    let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    &name[..end]
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    (0..record_count(data)).find(|&i| name_at(data, i) == name.as_bytes())
}

/// Adds a record for `name`. Fails if the name is empty, too long, already
/// recorded, or the page is full.
pub fn insert_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
    let count = record_count(data);
    if name.is_empty() || name.len() >= NAME_LEN || count >= MAX_RECORDS {
        return false;
    }
    if find_record(data, name).is_some() {
        return false;
    }
    let off = record_offset(count);
    data[off..off + NAME_LEN].fill(0);
    data[off..off + name.len()].copy_from_slice(name.as_bytes());
    data[off + NAME_LEN..off + RECORD_LEN].copy_from_slice(&root_page_id.to_le_bytes());
    set_record_count(data, count + 1);
    true
}

/// Rewrites the root page id recorded for `name`. Fails if absent.
pub fn update_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
    let Some(index) = find_record(data, name) else {
        return false;
    };
    let off = record_offset(index) + NAME_LEN;
    data[off..off + 4].copy_from_slice(&root_page_id.to_le_bytes());
    true
}

/// Drops the record for `name`. Fails if absent.
pub fn delete_record(data: &mut [u8], name: &str) -> bool {
    let Some(index) = find_record(data, name) else {
        return false;
    };
    let count = record_count(data);
    data.copy_within(record_offset(index + 1)..record_offset(count), record_offset(index));
    set_record_count(data, count - 1);
    true
}

/// Root page id recorded for `name`.
pub fn get_record(data: &[u8], name: &str) -> Option<PageId> {
    let index = find_record(data, name)?;
    let off = record_offset(index) + NAME_LEN;
    Some(i32::from_le_bytes([
        data[off],
        data[off + 1],
        data[off + 2],
        data[off + 3],
    ]))
}
