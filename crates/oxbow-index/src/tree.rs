//! Concurrent B+tree index over the buffer pool.

use crate::codec::{KeyComparator, Storable};
use crate::iterator::TreeIterator;
use crate::page::{self, header, internal, leaf, OpType, INTERNAL_HEADER_LEN, LEAF_HEADER_LEN};
use crate::transaction::{LatchedPage, PageLatch, Transaction};
use log::debug;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use oxbow_buffer::{BufferPoolManager, Page, PageReadGuard};
use oxbow_common::types::{PageData, PageId, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use oxbow_common::{OxbowError, Result};

/// An ordered map with unique keys, persisted across buffer-pool pages.
///
/// Leaf pages hold the data entries and chain in key order; internal pages
/// hold separator keys and child ids. Concurrent callers are coordinated by
/// latch crabbing: a descent write-latches the path and releases every
/// ancestor as soon as a child proves safe for the operation, while readers
/// hold at most one page latch at a time. A dedicated root-id latch guards
/// the binding of "which page is the root".
pub struct BPlusTree<K, V, C> {
    index_name: String,
    pool: Arc<BufferPoolManager>,
    comparator: C,
    root_page_id: Arc<RwLock<PageId>>,
    leaf_max_size: i32,
    internal_max_size: i32,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    /// Creates an empty tree whose node capacities are derived from the
    /// page size and entry widths.
    pub fn new(index_name: impl Into<String>, pool: Arc<BufferPoolManager>, comparator: C) -> Self {
        let leaf_max = ((PAGE_SIZE - LEAF_HEADER_LEN) / (K::LEN + V::LEN) - 1) as i32;
        let internal_max = ((PAGE_SIZE - INTERNAL_HEADER_LEN) / (K::LEN + 4) - 1) as i32;
        Self::with_max_sizes(index_name, pool, comparator, leaf_max, internal_max)
    }

    /// Creates an empty tree with explicit node capacities. Small
    /// capacities force deep trees out of few keys, which the scenario
    /// tests rely on.
    pub fn with_max_sizes(
        index_name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Self {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3);
        Self {
            index_name: index_name.into(),
            pool,
            comparator,
            root_page_id: Arc::new(RwLock::new(INVALID_PAGE_ID)),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Opens a tree recorded in the header page, restoring its root. A tree
    /// with no record starts empty.
    pub fn open(
        index_name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        let tree = Self::new(index_name, pool, comparator);
        let header_page = tree.pool.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let data = header_page.read_data();
            header::get_record(&data[..], &tree.index_name)
        };
        tree.pool.unpin_page(HEADER_PAGE_ID, false);
        if let Some(root) = root {
            *tree.root_page_id.write() = root;
        }
        Ok(tree)
    }

    /// Name this tree is recorded under in the header page.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    /// Current root page id, `INVALID_PAGE_ID` when empty.
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub(crate) fn pool(&self) -> &BufferPoolManager {
        &self.pool
    }

    // =========================================================================
    // Point lookup
    // =========================================================================

    /// Looks up the value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let Some((leaf_page, guard)) = self.find_leaf_shared(Some(key))? else {
            return Ok(None);
        };
        let result = leaf::lookup::<K, V, C>(&guard[..], key, &self.comparator);
        let page_id = leaf_page.page_id();
        drop(guard);
        self.pool.unpin_page(page_id, false);
        Ok(result)
    }

    /// Shared-mode descent to a leaf: hand-over-hand, at most one page latch
    /// held at a time. `None` target descends to the leftmost leaf.
    pub(crate) fn find_leaf_shared(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(Arc<Page>, PageReadGuard)>> {
        let root_guard = self.root_page_id.read_arc();
        let root = *root_guard;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page = self.pool.fetch_page(root)?;
        let mut guard = page.rlatch();
        let mut page_id = root;
        // the root page is pinned and latched; the root binding may go
        drop(root_guard);

        loop {
            if page::is_leaf(&guard[..]) {
                return Ok(Some((page, guard)));
            }
            let child = match key {
                Some(k) => internal::lookup::<K, C>(&guard[..], k, &self.comparator),
                None => internal::child_at::<K>(&guard[..], 0),
            };
            let child_page = match self.pool.fetch_page(child) {
                Ok(p) => p,
                Err(e) => {
                    drop(guard);
                    self.pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            let child_guard = child_page.rlatch();
            drop(guard);
            self.pool.unpin_page(page_id, false);
            page = child_page;
            guard = child_guard;
            page_id = child;
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `(key, value)`. Returns false if the key already exists.
    pub fn insert(&self, key: K, value: V, txn: &mut Transaction) -> Result<bool> {
        let result = self.insert_impl(&key, &value, txn);
        if result.is_err() {
            let _ = self.release_all(txn, true);
        }
        result
    }

    fn insert_impl(&self, key: &K, value: &V, txn: &mut Transaction) -> Result<bool> {
        let leaf_pid = loop {
            txn.lock_root_exclusive(&self.root_page_id);
            if txn.root_page_id() == INVALID_PAGE_ID {
                let started = self.start_new_tree(key, value, txn);
                txn.release_root();
                return started.map(|_| true);
            }
            txn.release_root();

            // a concurrent remover may empty the tree before the descent
            // re-takes the root latch; loop back to the empty-tree path
            match self.find_leaf_exclusive(key, OpType::Insert, txn)? {
                Some(pid) => break pid,
                None => continue,
            }
        };

        if leaf::lookup::<K, V, C>(txn.page_data(leaf_pid), key, &self.comparator).is_some() {
            self.release_all(txn, true)?;
            return Ok(false);
        }

        let new_size =
            leaf::insert::<K, V, C>(txn.page_data_mut(leaf_pid), key, value, &self.comparator);
        if new_size > page::max_size(txn.page_data(leaf_pid)) {
            self.split_leaf(leaf_pid, txn)?;
        }
        self.release_all(txn, true)?;
        Ok(true)
    }

    /// Plants a fresh root leaf holding the first entry. The caller holds
    /// the root-id latch exclusively.
    fn start_new_tree(&self, key: &K, value: &V, txn: &mut Transaction) -> Result<()> {
        debug_assert!(txn.holds_root_exclusive());
        let (page_id, root_page) = self.pool.new_page()?;
        {
            let mut data = root_page.write_data();
            page::init_leaf(&mut data[..], page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf::insert::<K, V, C>(&mut data[..], key, value, &self.comparator);
        }
        txn.set_root(page_id);
        let recorded = self.update_root_page_id(page_id, true);
        self.pool.unpin_page(page_id, true);
        recorded?;
        debug!("{}: started new tree at root {page_id}", self.index_name);
        Ok(())
    }

    /// Exclusive crabbing descent. Latches each page on the way down,
    /// releasing all ancestors (and the root-id latch) once a child is safe
    /// for `op`. Every latched page lands in the page set. Returns the leaf
    /// page id, or None if the tree is empty.
    fn find_leaf_exclusive(
        &self,
        key: &K,
        op: OpType,
        txn: &mut Transaction,
    ) -> Result<Option<PageId>> {
        txn.lock_root_exclusive(&self.root_page_id);
        if txn.root_page_id() == INVALID_PAGE_ID {
            txn.release_root();
            return Ok(None);
        }

        let mut page_id = txn.root_page_id();
        let root_page = match self.pool.fetch_page(page_id) {
            Ok(p) => p,
            Err(e) => {
                txn.release_root();
                return Err(e);
            }
        };
        let root_latch = root_page.wlatch();
        txn.push_page(root_page, PageLatch::Exclusive(root_latch));

        loop {
            if page::is_leaf(txn.page_data(page_id)) {
                return Ok(Some(page_id));
            }
            let child = internal::lookup::<K, C>(txn.page_data(page_id), key, &self.comparator);
            let child_page = self.pool.fetch_page(child)?;
            let child_latch = child_page.wlatch();
            if page::is_safe(&child_latch[..], op) {
                // the child cannot propagate a split or merge upward, so
                // everything above it can go
                self.release_all(txn, true)?;
            }
            txn.push_page(child_page, PageLatch::Exclusive(child_latch));
            page_id = child;
        }
    }

    /// Splits an over-full leaf, moving its upper half into a new right
    /// sibling and pushing the sibling's first key into the parent.
    fn split_leaf(&self, leaf_pid: PageId, txn: &mut Transaction) -> Result<()> {
        let (new_pid, new_page) = self.pool.new_page()?;
        let mut new_latch = new_page.wlatch();
        {
            let leaf_data = txn.page_data_mut(leaf_pid);
            page::init_leaf(
                &mut new_latch[..],
                new_pid,
                page::parent_page_id(leaf_data),
                self.leaf_max_size,
            );
            leaf::move_half_to::<K, V>(leaf_data, &mut new_latch[..]);
        }
        let separator = leaf::key_at::<K, V>(&new_latch[..], 0);
        txn.push_page(new_page, PageLatch::Exclusive(new_latch));
        debug!("{}: split leaf {leaf_pid} -> {new_pid}", self.index_name);
        self.insert_into_parent(leaf_pid, separator, new_pid, txn)
    }

    /// Splits an over-full internal page and re-parents the moved children.
    fn split_internal(&self, pid: PageId, txn: &mut Transaction) -> Result<()> {
        let (new_pid, new_page) = self.pool.new_page()?;
        let mut new_latch = new_page.wlatch();
        let moved = {
            let data = txn.page_data_mut(pid);
            page::init_internal(
                &mut new_latch[..],
                new_pid,
                page::parent_page_id(data),
                self.internal_max_size,
            );
            internal::move_half_to::<K>(data, &mut new_latch[..])
        };
        let separator = internal::key_at::<K>(&new_latch[..], 0);
        txn.push_page(new_page, PageLatch::Exclusive(new_latch));
        for child in moved {
            self.reparent(child, new_pid, txn)?;
        }
        debug!("{}: split internal {pid} -> {new_pid}", self.index_name);
        self.insert_into_parent(pid, separator, new_pid, txn)
    }

    /// Links a freshly split-off sibling into the tree: either grows a new
    /// root, or inserts the separator into the (already write-latched)
    /// parent, splitting it in turn when it overflows.
    fn insert_into_parent(
        &self,
        old_pid: PageId,
        separator: K,
        new_pid: PageId,
        txn: &mut Transaction,
    ) -> Result<()> {
        let parent_pid = page::parent_page_id(txn.page_data(old_pid));

        if parent_pid == INVALID_PAGE_ID {
            // the root split: nothing above was safe, so the root-id latch
            // is still ours and the rebind is atomic
            assert!(
                txn.holds_root_exclusive(),
                "root split without the root-id latch"
            );
            let (root_pid, root_page) = self.pool.new_page()?;
            {
                let mut data = root_page.write_data();
                page::init_internal(
                    &mut data[..],
                    root_pid,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                internal::populate_new_root::<K>(&mut data[..], old_pid, &separator, new_pid);
            }
            page::set_parent_page_id(txn.page_data_mut(old_pid), root_pid);
            page::set_parent_page_id(txn.page_data_mut(new_pid), root_pid);
            txn.set_root(root_pid);
            let recorded = self.update_root_page_id(root_pid, false);
            self.pool.unpin_page(root_pid, true);
            recorded?;
            debug!("{}: new root {root_pid}", self.index_name);
            return Ok(());
        }

        page::set_parent_page_id(txn.page_data_mut(new_pid), parent_pid);
        let new_size =
            internal::insert_after::<K>(txn.page_data_mut(parent_pid), old_pid, &separator, new_pid);
        if new_size > page::max_size(txn.page_data(parent_pid)) {
            self.split_internal(parent_pid, txn)?;
        }
        Ok(())
    }

    /// Rewrites a child's parent pointer. Writes through the page set when
    /// this operation already holds the child write-latched (a split or
    /// merge can move a page the descent latched), otherwise pins the child
    /// briefly.
    fn reparent(&self, child_pid: PageId, parent_pid: PageId, txn: &mut Transaction) -> Result<()> {
        if txn.contains_page(child_pid) {
            page::set_parent_page_id(txn.page_data_mut(child_pid), parent_pid);
            return Ok(());
        }
        let child = self.pool.fetch_page(child_pid)?;
        {
            let mut data = child.write_data();
            page::set_parent_page_id(&mut data[..], parent_pid);
        }
        self.pool.unpin_page(child_pid, true);
        Ok(())
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes `key` if present.
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        let result = self.remove_impl(key, txn);
        if result.is_err() {
            let _ = self.release_all(txn, true);
        }
        result
    }

    fn remove_impl(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        let Some(leaf_pid) = self.find_leaf_exclusive(key, OpType::Delete, txn)? else {
            return Ok(());
        };
        let size_after =
            leaf::remove::<K, V, C>(txn.page_data_mut(leaf_pid), key, &self.comparator);
        if size_after < page::min_size(txn.page_data(leaf_pid)) {
            self.coalesce_or_redistribute(leaf_pid, txn)?;
        }
        self.release_all(txn, true)
    }

    /// Fixes an underflowed page by merging with or borrowing from a
    /// sibling. Returns true if the page was scheduled for deletion.
    fn coalesce_or_redistribute(&self, pid: PageId, txn: &mut Transaction) -> Result<bool> {
        if page::is_root(txn.page_data(pid)) {
            let deleted = self.adjust_root(pid, txn)?;
            if deleted {
                txn.mark_deleted(pid);
            }
            return Ok(deleted);
        }

        let parent_pid = page::parent_page_id(txn.page_data(pid));
        let node_index = internal::child_index::<K>(txn.page_data(parent_pid), pid)
            .unwrap_or_else(|| panic!("page {pid} missing from parent {parent_pid}"));
        // prefer the left sibling; only the leftmost child borrows rightward
        let (sibling_index, sibling_is_right) = if node_index == 0 {
            (1, true)
        } else {
            (node_index - 1, false)
        };
        let sibling_pid = internal::child_at::<K>(txn.page_data(parent_pid), sibling_index);

        let sibling_page = self.pool.fetch_page(sibling_pid)?;
        let sibling_latch = sibling_page.wlatch();
        txn.push_page(sibling_page, PageLatch::Exclusive(sibling_latch));

        let node_size = page::size(txn.page_data(pid));
        let sibling_size = page::size(txn.page_data(sibling_pid));

        if node_size + sibling_size <= page::max_size(txn.page_data(pid)) {
            // merge into the left partner and drop the right one
            let (recv_pid, del_pid) = if sibling_is_right {
                (pid, sibling_pid)
            } else {
                (sibling_pid, pid)
            };
            let remove_index = internal::child_index::<K>(txn.page_data(parent_pid), del_pid)
                .unwrap_or_else(|| panic!("page {del_pid} missing from parent {parent_pid}"));

            if page::is_leaf(txn.page_data(pid)) {
                let (del, recv) = txn.pair_data_mut(del_pid, recv_pid);
                leaf::move_all_to::<K, V>(del, recv);
            } else {
                let middle_key = internal::key_at::<K>(txn.page_data(parent_pid), remove_index);
                let moved = {
                    let (del, recv) = txn.pair_data_mut(del_pid, recv_pid);
                    internal::move_all_to::<K>(del, recv, &middle_key)
                };
                for child in moved {
                    self.reparent(child, recv_pid, txn)?;
                }
            }
            txn.mark_deleted(del_pid);
            internal::remove_at::<K>(txn.page_data_mut(parent_pid), remove_index);
            debug!("{}: coalesced {del_pid} into {recv_pid}", self.index_name);

            let parent_data = txn.page_data(parent_pid);
            if page::size(parent_data) <= page::min_size(parent_data) {
                self.coalesce_or_redistribute(parent_pid, txn)?;
            }
            Ok(true)
        } else {
            self.redistribute(pid, sibling_pid, parent_pid, node_index, sibling_is_right, txn)?;
            Ok(false)
        }
    }

    /// Borrows one entry from a sibling and rewrites the separator between
    /// the two in the parent.
    fn redistribute(
        &self,
        node_pid: PageId,
        sibling_pid: PageId,
        parent_pid: PageId,
        node_index: usize,
        sibling_is_right: bool,
        txn: &mut Transaction,
    ) -> Result<()> {
        let is_leaf = page::is_leaf(txn.page_data(node_pid));

        if sibling_is_right {
            // sibling's first entry moves to the node's end; the sibling's
            // separator in the parent becomes its new first key
            let separator_index =
                internal::child_index::<K>(txn.page_data(parent_pid), sibling_pid)
                    .unwrap_or_else(|| panic!("page {sibling_pid} missing from parent"));
            if is_leaf {
                {
                    let (sibling, node) = txn.pair_data_mut(sibling_pid, node_pid);
                    leaf::move_first_to_end_of::<K, V>(sibling, node);
                }
                let new_separator = leaf::key_at::<K, V>(txn.page_data(sibling_pid), 0);
                internal::set_key_at::<K>(
                    txn.page_data_mut(parent_pid),
                    separator_index,
                    &new_separator,
                );
            } else {
                let separator =
                    internal::key_at::<K>(txn.page_data(parent_pid), separator_index);
                let moved = {
                    let (sibling, node) = txn.pair_data_mut(sibling_pid, node_pid);
                    internal::move_first_to_end_of::<K>(sibling, node, &separator)
                };
                self.reparent(moved, node_pid, txn)?;
                let new_separator = internal::key_at::<K>(txn.page_data(sibling_pid), 0);
                internal::set_key_at::<K>(
                    txn.page_data_mut(parent_pid),
                    separator_index,
                    &new_separator,
                );
            }
        } else {
            // left sibling's last entry moves to the node's front; the
            // node's separator in the parent becomes the moved key
            let separator_index = node_index;
            if is_leaf {
                {
                    let (sibling, node) = txn.pair_data_mut(sibling_pid, node_pid);
                    leaf::move_last_to_front_of::<K, V>(sibling, node);
                }
                let new_separator = leaf::key_at::<K, V>(txn.page_data(node_pid), 0);
                internal::set_key_at::<K>(
                    txn.page_data_mut(parent_pid),
                    separator_index,
                    &new_separator,
                );
            } else {
                let separator =
                    internal::key_at::<K>(txn.page_data(parent_pid), separator_index);
                let moved = {
                    let (sibling, node) = txn.pair_data_mut(sibling_pid, node_pid);
                    internal::move_last_to_front_of::<K>(sibling, node, &separator)
                };
                self.reparent(moved, node_pid, txn)?;
                let new_separator = internal::key_at::<K>(txn.page_data(node_pid), 0);
                internal::set_key_at::<K>(
                    txn.page_data_mut(parent_pid),
                    separator_index,
                    &new_separator,
                );
            }
        }
        debug!(
            "{}: redistributed between {node_pid} and {sibling_pid}",
            self.index_name
        );
        Ok(())
    }

    /// Handles underflow at the root: an empty root leaf empties the tree,
    /// a root internal down to one child promotes that child. Returns true
    /// if the old root should be deleted.
    fn adjust_root(&self, root_pid: PageId, txn: &mut Transaction) -> Result<bool> {
        let (is_leaf, size) = {
            let data = txn.page_data(root_pid);
            (page::is_leaf(data), page::size(data))
        };

        if is_leaf {
            if size == 0 {
                assert!(txn.holds_root_exclusive());
                txn.set_root(INVALID_PAGE_ID);
                self.update_root_page_id(INVALID_PAGE_ID, false)?;
                debug!("{}: tree emptied", self.index_name);
                return Ok(true);
            }
            return Ok(false);
        }

        if size == 1 {
            assert!(txn.holds_root_exclusive());
            let only_child = internal::remove_and_return_only_child::<K>(txn.page_data_mut(root_pid));
            txn.set_root(only_child);
            self.update_root_page_id(only_child, false)?;
            self.reparent(only_child, INVALID_PAGE_ID, txn)?;
            debug!("{}: root collapsed to {only_child}", self.index_name);
            return Ok(true);
        }
        Ok(false)
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterates every entry in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator<'_, K, V, C>> {
        let leaf = self.find_leaf_shared(None)?;
        Ok(TreeIterator::new(self, leaf, 0))
    }

    /// Iterates entries with keys greater than or equal to `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K, V, C>> {
        match self.find_leaf_shared(Some(key))? {
            Some((leaf_page, guard)) => {
                let index = leaf::key_index::<K, V, C>(&guard[..], key, &self.comparator);
                Ok(TreeIterator::new(self, Some((leaf_page, guard)), index))
            }
            None => Ok(TreeIterator::new(self, None, 0)),
        }
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    /// Releases everything an operation holds: the root-id latch, then each
    /// page of the page set in descent order (unlatch, unpin, destroy if
    /// marked).
    fn release_all(&self, txn: &mut Transaction, exclusive: bool) -> Result<()> {
        txn.release_root();
        for latched in txn.drain_pages() {
            let LatchedPage {
                page_id,
                page: _,
                latch,
            } = latched;
            drop(latch);
            self.pool.unpin_page(page_id, exclusive);
            if txn.take_deleted(page_id) {
                self.pool.delete_page(page_id)?;
            }
        }
        debug_assert!(txn.deleted_is_empty());
        Ok(())
    }

    /// Records the current root page id in the header page under this
    /// tree's name.
    fn update_root_page_id(&self, root: PageId, insert_record: bool) -> Result<()> {
        let header_page = self.pool.fetch_page(HEADER_PAGE_ID)?;
        let recorded = {
            let mut data = header_page.write_data();
            if insert_record {
                header::insert_record(&mut data[..], &self.index_name, root)
                    || header::update_record(&mut data[..], &self.index_name, root)
            } else {
                header::update_record(&mut data[..], &self.index_name, root)
                    || header::insert_record(&mut data[..], &self.index_name, root)
            }
        };
        self.pool.unpin_page(HEADER_PAGE_ID, true);
        if !recorded {
            return Err(OxbowError::HeaderPageFull(self.index_name.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Integrity checking
    // =========================================================================

    /// Verifies tree structure: per-page size bounds and key order,
    /// separator/subtree relationships, uniform leaf depth, and that no
    /// frame is left pinned. Intended for tests and debugging on a
    /// quiescent tree.
    pub fn check(&self) -> Result<bool> {
        if !self.is_empty() {
            let root = self.root_page_id();
            self.check_subtree(root)?;
            self.subtree_depth(root)?;
        }
        Ok(self.pool.check_all_unpinned())
    }

    /// Height of the tree: 0 when empty, 1 for a lone root leaf.
    pub fn depth(&self) -> Result<i32> {
        if self.is_empty() {
            return Ok(0);
        }
        self.subtree_depth(self.root_page_id())
    }

    /// Copies a page out of the pool so checks can recurse without holding
    /// pins.
    fn read_node(&self, pid: PageId) -> Result<Box<PageData>> {
        let node_page = self.pool.fetch_page(pid)?;
        let copy = {
            let data = node_page.read_data();
            Box::new(*data)
        };
        self.pool.unpin_page(pid, false);
        Ok(copy)
    }

    fn subtree_depth(&self, pid: PageId) -> Result<i32> {
        let data = self.read_node(pid)?;
        if page::is_leaf(&data[..]) {
            return Ok(1);
        }
        let mut depth = None;
        for i in 0..page::size(&data[..]) as usize {
            let child_depth = self.subtree_depth(internal::child_at::<K>(&data[..], i))?;
            match depth {
                None => depth = Some(child_depth),
                Some(d) if d != child_depth => {
                    return Err(OxbowError::IndexCorrupted(format!(
                        "page {pid}: leaves at unequal depth"
                    )));
                }
                _ => {}
            }
        }
        Ok(depth.unwrap_or(0) + 1)
    }

    /// Checks one subtree, returning the smallest and largest key in it.
    fn check_subtree(&self, pid: PageId) -> Result<(K, K)> {
        let data = self.read_node(pid)?;
        let size = page::size(&data[..]);
        let corrupt = |reason: String| Err(OxbowError::IndexCorrupted(reason));

        if !page::is_root(&data[..])
            && (size < page::min_size(&data[..]) || size > page::max_size(&data[..]))
        {
            return corrupt(format!("page {pid}: size {size} out of bounds"));
        }

        if page::is_leaf(&data[..]) {
            if size == 0 {
                return corrupt(format!("leaf {pid} is empty"));
            }
            for i in 1..size as usize {
                let prev = leaf::key_at::<K, V>(&data[..], i - 1);
                let cur = leaf::key_at::<K, V>(&data[..], i);
                if self.comparator.compare(&prev, &cur) != Ordering::Less {
                    return corrupt(format!("leaf {pid}: keys out of order at {i}"));
                }
            }
            return Ok((
                leaf::key_at::<K, V>(&data[..], 0),
                leaf::key_at::<K, V>(&data[..], size as usize - 1),
            ));
        }

        if size < 2 {
            return corrupt(format!("internal {pid}: size {size} < 2"));
        }
        let mut left_range = self.check_subtree(internal::child_at::<K>(&data[..], 0))?;
        let low = left_range.0.clone();
        for i in 1..size as usize {
            let separator = internal::key_at::<K>(&data[..], i);
            let right_range = self.check_subtree(internal::child_at::<K>(&data[..], i))?;
            if self.comparator.compare(&separator, &left_range.1) != Ordering::Greater {
                return corrupt(format!("internal {pid}: separator {i} <= left subtree max"));
            }
            if self.comparator.compare(&separator, &right_range.0) == Ordering::Greater {
                return corrupt(format!("internal {pid}: separator {i} > right subtree min"));
            }
            if i > 1 {
                let prev = internal::key_at::<K>(&data[..], i - 1);
                if self.comparator.compare(&prev, &separator) != Ordering::Less {
                    return corrupt(format!("internal {pid}: separators out of order at {i}"));
                }
            }
            left_range = right_range;
        }
        Ok((low, left_range.1))
    }
}
