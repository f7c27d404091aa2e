//! LRU victim selector for the buffer pool.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Ordered set of evictable values, newest-first.
///
/// `insert` moves an existing value to the newest end (or adds it),
/// `victim` pops the oldest, `erase` drops a value wherever it sits.
/// All operations are O(1) on average and serialised under one latch.
///
/// The queue keeps one record per `insert`; a map from value to its latest
/// stamp marks which record is live. Superseded records are purged lazily
/// when `victim` walks past them.
pub struct LruReplacer<T> {
    inner: Mutex<LruInner<T>>,
}

struct LruInner<T> {
    /// Insertion records, oldest at the front. Entries whose stamp is no
    /// longer the value's live stamp are stale.
    queue: VecDeque<(u64, T)>,
    /// Live stamp per tracked value.
    entries: HashMap<T, u64>,
    next_stamp: u64,
}

impl<T: Clone + Eq + Hash> LruReplacer<T> {
    /// Creates an empty replacer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruInner {
                queue: VecDeque::new(),
                entries: HashMap::new(),
                next_stamp: 0,
            }),
        }
    }

    /// Inserts a value at the newest end, moving it there if already
    /// tracked.
    pub fn insert(&self, value: T) {
        let mut inner = self.inner.lock();
        inner.next_stamp += 1;
        let stamp = inner.next_stamp;
        inner.entries.insert(value.clone(), stamp);
        inner.queue.push_back((stamp, value));
    }

    /// Removes a value. Returns true if it was tracked.
    pub fn erase(&self, value: &T) -> bool {
        let mut inner = self.inner.lock();
        inner.entries.remove(value).is_some()
    }

    /// Pops the oldest tracked value, if any.
    pub fn victim(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while let Some((stamp, value)) = inner.queue.pop_front() {
            if inner.entries.get(&value) == Some(&stamp) {
                inner.entries.remove(&value);
                return Some(value);
            }
            // stale record: value was erased or re-inserted since
        }
        None
    }

    /// Number of tracked values.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl<T: Clone + Eq + Hash> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}
