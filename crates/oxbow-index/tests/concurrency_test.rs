//! Concurrent B+tree scenarios: one shared tree, many threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use oxbow_buffer::{BufferPoolManager, MemoryDiskManager};
use oxbow_common::types::{PageId, Rid};
use oxbow_index::{BPlusTree, OrdComparator, Transaction};

type TestTree = BPlusTree<i64, Rid, OrdComparator>;

fn shared_tree(pool_size: usize) -> Arc<TestTree> {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = Arc::new(BufferPoolManager::with_pool_size(
        pool_size,
        Arc::new(MemoryDiskManager::new()),
    ));
    Arc::new(BPlusTree::with_max_sizes(
        "concurrent_test",
        pool,
        OrdComparator,
        4,
        4,
    ))
}

fn rid(k: i64) -> Rid {
    Rid::new(k as PageId, k as u32)
}

#[test]
fn test_concurrent_disjoint_inserts() {
    // S1: threads insert disjoint key ranges; the union survives
    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 200;

    let tree = shared_tree(256);
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            for i in 0..PER_THREAD {
                let k = t * 1000 + i;
                assert!(tree.insert(k, rid(k), &mut txn).unwrap(), "insert {k}");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let k = t * 1000 + i;
            assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)), "lookup {k}");
        }
    }
    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys.len(), (THREADS * PER_THREAD) as usize);
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "scan out of order");
    assert!(tree.check().unwrap());
}

#[test]
fn test_concurrent_insert_remove_one_key() {
    // S2: inserters and removers race on one key; the tree stays sound
    const KEY: i64 = 42;
    const ROUNDS: usize = 200;

    let tree = shared_tree(128);

    // background keys keep the tree non-trivial while the races run
    {
        let mut txn = Transaction::new();
        for k in 1000..1100 {
            tree.insert(k, rid(k), &mut txn).unwrap();
        }
    }

    let mut handles = Vec::new();
    for _ in 0..2 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            for _ in 0..ROUNDS {
                let _ = tree.insert(KEY, rid(KEY), &mut txn).unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            for _ in 0..ROUNDS {
                tree.remove(&KEY, &mut txn).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // the key is either fully present or fully absent
    let found = tree.get_value(&KEY).unwrap();
    assert!(found.is_none() || found == Some(rid(KEY)));
    assert!(tree.check().unwrap());

    // and the tree still accepts deterministic operations afterwards
    let mut txn = Transaction::new();
    tree.remove(&KEY, &mut txn).unwrap();
    assert!(tree.insert(KEY, rid(KEY), &mut txn).unwrap());
    assert_eq!(tree.get_value(&KEY).unwrap(), Some(rid(KEY)));
    assert!(tree.check().unwrap());
}

#[test]
fn test_readers_during_splits_see_monotonic_presence() {
    // S3: a writer splits nodes while readers poll; with no removers, a key
    // observed present must never be observed absent afterwards
    const KEYS: i64 = 600;

    let tree = shared_tree(256);
    let done = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    for _ in 0..3 {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        handles.push(thread::spawn(move || {
            let mut seen = vec![false; KEYS as usize];
            while !done.load(Ordering::Acquire) {
                for k in 0..KEYS {
                    match tree.get_value(&k).unwrap() {
                        Some(v) => {
                            assert_eq!(v, rid(k));
                            seen[k as usize] = true;
                        }
                        None => {
                            assert!(!seen[k as usize], "key {k} vanished after being seen");
                        }
                    }
                }
            }
            seen
        }));
    }

    {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            for k in 0..KEYS {
                assert!(tree.insert(k, rid(k), &mut txn).unwrap());
            }
            done.store(true, Ordering::Release);
            Vec::new()
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for k in 0..KEYS {
        assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)));
    }
    assert!(tree.check().unwrap());
}

#[test]
fn test_concurrent_interleaved_inserts() {
    // threads interleave over the same key space, every key claimed once
    const THREADS: i64 = 4;
    const TOTAL: i64 = 400;

    let tree = shared_tree(256);
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            let mut claimed = 0u32;
            for k in (t..TOTAL).step_by(THREADS as usize) {
                if tree.insert(k, rid(k), &mut txn).unwrap() {
                    claimed += 1;
                }
            }
            claimed
        }));
    }

    let claimed: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(claimed, TOTAL as u32);

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..TOTAL).collect::<Vec<_>>());
    assert!(tree.check().unwrap());
}

#[test]
fn test_concurrent_removes_drain_tree() {
    const TOTAL: i64 = 400;

    let tree = shared_tree(256);
    {
        let mut txn = Transaction::new();
        for k in 0..TOTAL {
            tree.insert(k, rid(k), &mut txn).unwrap();
        }
    }

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut txn = Transaction::new();
            for k in (t..TOTAL).step_by(4) {
                tree.remove(&k, &mut txn).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(tree.is_empty());
    for k in 0..TOTAL {
        assert_eq!(tree.get_value(&k).unwrap(), None);
    }
    assert!(tree.check().unwrap());
}
