//! Extendible hash table.
//!
//! A directory-based dynamic hash: a power-of-two directory of bucket
//! references is doubled on demand while individual buckets split
//! independently under a local depth. The buffer pool uses it as its page
//! directory; it also works as a generic associative container.

use log::trace;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::BTreeMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

/// Default number of entries a bucket holds before it splits.
pub const DEFAULT_BUCKET_CAPACITY: usize = 50;

struct Bucket<K, V> {
    local_depth: u32,
    items: BTreeMap<K, V>,
}

struct Directory<K, V> {
    global_depth: u32,
    bucket_count: usize,
    /// `2^global_depth` slots. Two slots reference the same bucket iff they
    /// agree in the bucket's low `local_depth` bits.
    slots: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

type BucketRef<K, V> = Arc<Mutex<Bucket<K, V>>>;
type BucketGuard<K, V> = ArcMutexGuard<RawMutex, Bucket<K, V>>;

/// Extendible hash table from K to V.
///
/// A table latch protects the directory and `global_depth`; each bucket has
/// its own latch protecting its map. The nested acquisition order is always
/// bucket then table, never the reverse.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_capacity: usize,
    hasher: S,
    dir: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq + Ord,
{
    /// Creates a table with the given bucket capacity and a randomly seeded
    /// hasher.
    pub fn new(bucket_capacity: usize) -> Self {
        Self::with_hasher(bucket_capacity, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Ord,
    S: BuildHasher,
{
    /// Creates a table with the given bucket capacity and hasher.
    pub fn with_hasher(bucket_capacity: usize, hasher: S) -> Self {
        assert!(bucket_capacity > 0, "bucket capacity must be positive");
        Self {
            bucket_capacity,
            hasher,
            dir: Mutex::new(Directory {
                global_depth: 0,
                bucket_count: 1,
                slots: vec![Arc::new(Mutex::new(Bucket {
                    local_depth: 0,
                    items: BTreeMap::new(),
                }))],
            }),
        }
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    fn slot_index(&self, key: &K, global_depth: u32) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (self.hash_key(key) & mask) as usize
    }

    /// Locks the bucket currently responsible for `key`.
    ///
    /// The slot is re-read under the bucket latch: a split can rewire the
    /// directory between picking the bucket and locking it.
    fn lock_bucket_for(&self, key: &K) -> (BucketRef<K, V>, BucketGuard<K, V>) {
        loop {
            let bucket = {
                let dir = self.dir.lock();
                let idx = self.slot_index(key, dir.global_depth);
                Arc::clone(&dir.slots[idx])
            };
            let guard = bucket.lock_arc();
            let dir = self.dir.lock();
            let idx = self.slot_index(key, dir.global_depth);
            let current = Arc::ptr_eq(&dir.slots[idx], &bucket);
            drop(dir);
            if current {
                return (bucket, guard);
            }
        }
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let (_, guard) = self.lock_bucket_for(key);
        guard.items.get(key).cloned()
    }

    /// Deletes the entry stored under `key`. Returns true if it existed.
    /// The directory never shrinks.
    pub fn remove(&self, key: &K) -> bool {
        let (_, mut guard) = self.lock_bucket_for(key);
        guard.items.remove(key).is_some()
    }

    /// Inserts `value` under `key`, replacing any existing value. A full
    /// bucket is split (doubling the directory when its local depth reaches
    /// the global depth) and the insert retried against the re-probed slot.
    pub fn insert(&self, key: K, value: V) {
        loop {
            let (bucket, mut guard) = self.lock_bucket_for(&key);
            // replace on duplicate, plain insert while there is room;
            // only a new key in a full bucket forces a split
            if guard.items.contains_key(&key) || guard.items.len() < self.bucket_capacity {
                guard.items.insert(key, value);
                return;
            }
            self.split_bucket(&bucket, &mut guard);
            drop(guard);
            // re-probe: global_depth may have grown, recompute the slot
        }
    }

    fn split_bucket(&self, bucket: &BucketRef<K, V>, guard: &mut BucketGuard<K, V>) {
        let high_bit = 1u64 << guard.local_depth;
        guard.local_depth += 1;

        let mut dir = self.dir.lock();
        if guard.local_depth > dir.global_depth {
            // double the directory so each bucket is referenced by two
            // slots differing only in the new high bit
            let len = dir.slots.len();
            for i in 0..len {
                let dup = Arc::clone(&dir.slots[i]);
                dir.slots.push(dup);
            }
            dir.global_depth += 1;
        }

        let mut sibling_items = BTreeMap::new();
        let old_items = std::mem::take(&mut guard.items);
        for (k, v) in old_items {
            if self.hash_key(&k) & high_bit != 0 {
                sibling_items.insert(k, v);
            } else {
                guard.items.insert(k, v);
            }
        }
        let sibling = Arc::new(Mutex::new(Bucket {
            local_depth: guard.local_depth,
            items: sibling_items,
        }));
        dir.bucket_count += 1;

        for (i, slot) in dir.slots.iter_mut().enumerate() {
            if Arc::ptr_eq(slot, bucket) && (i as u64) & high_bit != 0 {
                *slot = Arc::clone(&sibling);
            }
        }
        trace!(
            "split bucket: local depth {} -> {}, global depth {}",
            guard.local_depth - 1,
            guard.local_depth,
            dir.global_depth
        );
    }

    /// Returns the directory's global depth.
    pub fn global_depth(&self) -> u32 {
        self.dir.lock().global_depth
    }

    /// Returns the local depth of the bucket referenced by `slot`, if the
    /// slot exists.
    pub fn local_depth(&self, slot: usize) -> Option<u32> {
        let bucket = {
            let dir = self.dir.lock();
            Arc::clone(dir.slots.get(slot)?)
        };
        let depth = bucket.lock().local_depth;
        Some(depth)
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.dir.lock().bucket_count
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        let slots = {
            let dir = self.dir.lock();
            dir.slots.clone()
        };
        let mut seen: Vec<*const Mutex<Bucket<K, V>>> = Vec::new();
        let mut total = 0;
        for slot in &slots {
            let ptr = Arc::as_ptr(slot);
            if !seen.contains(&ptr) {
                seen.push(ptr);
                total += slot.lock().items.len();
            }
        }
        total
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
