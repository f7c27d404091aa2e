//! Fixed-width key/value codecs and the key comparator seam.

use std::cmp::Ordering;
use oxbow_common::types::Rid;

/// A value with a fixed little-endian wire encoding, storable inside an
/// index page.
pub trait Storable: Sized + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Encoded length in bytes.
    const LEN: usize;

    /// Writes the value into `buf[..Self::LEN]`.
    fn write_to(&self, buf: &mut [u8]);

    /// Reads a value from `buf[..Self::LEN]`.
    fn read_from(buf: &[u8]) -> Self;
}

impl Storable for i32 {
    const LEN: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Storable for u32 {
    const LEN: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl Storable for i64 {
    const LEN: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        i64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

impl Storable for u64 {
    const LEN: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

impl Storable for Rid {
    const LEN: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Rid {
            page_id: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Key ordering provided to the tree at construction.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator delegating to the key's `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}
