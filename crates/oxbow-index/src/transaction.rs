//! Per-operation context for tree descents.
//!
//! A `Transaction` is an ownerless bag tracking what one tree operation
//! currently holds: the pages it has latched (in descent order, each with
//! its owned latch guard), the page ids it has decided to destroy, and the
//! root-id latch if still held. The tree releases everything in one pass
//! when the operation completes or ancestors become releasable.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use oxbow_buffer::{Page, PageReadGuard, PageWriteGuard};
use oxbow_common::types::PageId;

/// An owned latch on one page.
pub enum PageLatch {
    Shared(PageReadGuard),
    Exclusive(PageWriteGuard),
}

impl PageLatch {
    /// The latched page bytes.
    pub fn data(&self) -> &[u8] {
        match self {
            PageLatch::Shared(guard) => &guard[..],
            PageLatch::Exclusive(guard) => &guard[..],
        }
    }

    /// The latched page bytes, writable. Panics on a shared latch.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match self {
            PageLatch::Shared(_) => panic!("page is only read-latched"),
            PageLatch::Exclusive(guard) => &mut guard[..],
        }
    }

    /// Returns true for a write latch.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, PageLatch::Exclusive(_))
    }
}

/// An owned latch on the root page id binding.
pub enum RootLatch {
    Shared(ArcRwLockReadGuard<RawRwLock, PageId>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, PageId>),
}

/// One latched page in the page set.
pub struct LatchedPage {
    pub page_id: PageId,
    pub page: Arc<Page>,
    pub latch: PageLatch,
}

/// Context passed through a tree operation.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<LatchedPage>,
    deleted: HashSet<PageId>,
    root_latch: Option<RootLatch>,
}

impl Transaction {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the root-id latch in shared mode.
    pub fn lock_root_shared(&mut self, root: &Arc<RwLock<PageId>>) {
        debug_assert!(self.root_latch.is_none());
        self.root_latch = Some(RootLatch::Shared(root.read_arc()));
    }

    /// Takes the root-id latch in exclusive mode.
    pub fn lock_root_exclusive(&mut self, root: &Arc<RwLock<PageId>>) {
        debug_assert!(self.root_latch.is_none());
        self.root_latch = Some(RootLatch::Exclusive(root.write_arc()));
    }

    /// Reads the root page id through the held latch.
    pub fn root_page_id(&self) -> PageId {
        match self.root_latch.as_ref().expect("root-id latch not held") {
            RootLatch::Shared(guard) => **guard,
            RootLatch::Exclusive(guard) => **guard,
        }
    }

    /// Rebinds the root page id. The latch must be held exclusively.
    pub fn set_root(&mut self, page_id: PageId) {
        match self.root_latch.as_mut() {
            Some(RootLatch::Exclusive(guard)) => **guard = page_id,
            _ => panic!("root-id latch not held exclusively"),
        }
    }

    /// Returns true while the root-id latch is held.
    pub fn holds_root(&self) -> bool {
        self.root_latch.is_some()
    }

    /// Returns true while the root-id latch is held exclusively.
    pub fn holds_root_exclusive(&self) -> bool {
        matches!(self.root_latch, Some(RootLatch::Exclusive(_)))
    }

    /// Drops the root-id latch if held. Idempotent.
    pub fn release_root(&mut self) {
        self.root_latch = None;
    }

    /// Records a latched page at the end of the page set.
    pub fn push_page(&mut self, page: Arc<Page>, latch: PageLatch) {
        let page_id = page.page_id();
        self.page_set.push(LatchedPage {
            page_id,
            page,
            latch,
        });
    }

    /// Returns true if the page is in the page set.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.index_of(page_id).is_some()
    }

    /// Number of latched pages.
    pub fn page_count(&self) -> usize {
        self.page_set.len()
    }

    fn index_of(&self, page_id: PageId) -> Option<usize> {
        self.page_set.iter().position(|p| p.page_id == page_id)
    }

    fn expect_index(&self, page_id: PageId) -> usize {
        self.index_of(page_id)
            .unwrap_or_else(|| panic!("page {page_id} is not in the page set"))
    }

    /// Bytes of a latched page.
    pub fn page_data(&self, page_id: PageId) -> &[u8] {
        self.page_set[self.expect_index(page_id)].latch.data()
    }

    /// Writable bytes of a write-latched page.
    pub fn page_data_mut(&mut self, page_id: PageId) -> &mut [u8] {
        let index = self.expect_index(page_id);
        self.page_set[index].latch.data_mut()
    }

    /// Writable bytes of two distinct write-latched pages at once.
    pub fn pair_data_mut(&mut self, a: PageId, b: PageId) -> (&mut [u8], &mut [u8]) {
        let i = self.expect_index(a);
        let j = self.expect_index(b);
        assert_ne!(i, j, "pair_data_mut needs two distinct pages");

        let (lo, hi, swapped) = if i < j { (i, j, false) } else { (j, i, true) };
        let (head, tail) = self.page_set.split_at_mut(hi);
        let first = head[lo].latch.data_mut();
        let second = tail[0].latch.data_mut();
        if swapped {
            (second, first)
        } else {
            (first, second)
        }
    }

    /// Marks a page for destruction once the operation completes.
    pub fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.insert(page_id);
    }

    /// Consumes a deletion mark, returning whether it was set.
    pub fn take_deleted(&mut self, page_id: PageId) -> bool {
        self.deleted.remove(&page_id)
    }

    /// Returns true when no deletion marks remain.
    pub fn deleted_is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    /// Empties the page set, handing the latched pages to the caller in
    /// descent order.
    pub fn drain_pages(&mut self) -> Vec<LatchedPage> {
        std::mem::take(&mut self.page_set)
    }
}
