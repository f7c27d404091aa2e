//! Buffer pool page frames.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use oxbow_common::types::{PageData, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Owned shared guard over a page's data. Holding it is the page's
/// read latch.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, PageData>;

/// Owned exclusive guard over a page's data. Holding it is the page's
/// write latch.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, PageData>;

/// A page resident in one buffer pool frame.
///
/// The byte buffer sits behind a readers-writer latch; callers that need to
/// retain the latch across function boundaries (crabbing descents, the index
/// iterator) take owned guards. The metadata fields are atomics so they can
/// be read from any thread, but they are only mutated while the buffer pool
/// manager latch is held.
pub struct Page {
    /// Page data behind the page latch.
    data: Arc<RwLock<PageData>>,
    /// Page currently stored in this frame, INVALID_PAGE_ID when free.
    page_id: AtomicI32,
    /// Number of users currently holding this page.
    pin_count: AtomicU32,
    /// Whether the buffered bytes differ from the on-disk copy.
    is_dirty: AtomicBool,
}

impl Page {
    /// Creates a new free page frame.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the page id stored in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    /// Sets the page id for this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count.
    #[inline]
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the pin count and returns the new value.
    ///
    /// Panics on underflow: unpinning an unpinned page is a caller bug.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "pin count underflow on page {}", self.page_id());
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks this frame dirty or clean.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns true if this frame holds no page.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.page_id() == INVALID_PAGE_ID
    }

    /// Takes the page read latch for the current scope.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    /// Takes the page write latch for the current scope.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    /// Takes the page read latch as an owned guard.
    #[inline]
    pub fn rlatch(&self) -> PageReadGuard {
        self.data.read_arc()
    }

    /// Takes the page write latch as an owned guard.
    #[inline]
    pub fn wlatch(&self) -> PageWriteGuard {
        self.data.write_arc()
    }

    /// Resets the frame to the free state and zeroes its bytes.
    pub fn reset(&self) {
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }

    /// Overwrites the pin count. Only the buffer pool manager calls this,
    /// under the manager latch.
    #[inline]
    pub fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::Release);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
