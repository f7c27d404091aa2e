//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::hash_table::{ExtendibleHashTable, DEFAULT_BUCKET_CAPACITY};
use crate::lru::LruReplacer;
use crate::page::Page;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::System;
use oxbow_common::types::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use oxbow_common::{OxbowError, Result, StorageConfig};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// Bucket capacity of the page directory.
    pub bucket_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            bucket_capacity: config.bucket_capacity,
        }
    }
}

/// State mutated under the manager latch: the free list, the page directory,
/// and the LRU selector. A frame is in at most one of {free list, LRU}.
struct PoolCore {
    free_list: VecDeque<FrameId>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruReplacer<FrameId>,
}

/// Buffer pool manager.
///
/// Owns a fixed array of page frames and maps resident page ids to frames
/// through an extendible hash directory. Victims come from the free list
/// first, then from the LRU selector; a victim always has pin count zero.
/// Every public operation holds the single manager latch for its duration,
/// including disk I/O for write-back and loads.
pub struct BufferPoolManager {
    frames: Box<[Arc<Page>]>,
    disk: Arc<dyn DiskManager>,
    latch: Mutex<PoolCore>,
}

impl BufferPoolManager {
    /// Creates a buffer pool with the given configuration.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> Self {
        let frames: Box<[Arc<Page>]> = (0..config.pool_size)
            .map(|_| Arc::new(Page::new()))
            .collect();
        let free_list: VecDeque<FrameId> =
            (0..config.pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            disk,
            latch: Mutex::new(PoolCore {
                free_list,
                page_table: ExtendibleHashTable::new(config.bucket_capacity),
                replacer: LruReplacer::new(),
            }),
        }
    }

    /// Creates a buffer pool with the given frame count and default bucket
    /// capacity.
    pub fn with_pool_size(pool_size: usize, disk: Arc<dyn DiskManager>) -> Self {
        Self::new(
            BufferPoolConfig {
                pool_size,
                ..Default::default()
            },
            disk,
        )
    }

    /// Creates a buffer pool sized to 25% of available system RAM, with a
    /// floor of 1,000 frames so small machines still cache usefully.
    pub fn auto_sized(disk: Arc<dyn DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let pool_size = (available_bytes / 4 / PAGE_SIZE).max(1_000);

        Self::with_pool_size(pool_size, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.latch.lock().page_table.find(&page_id).is_some()
    }

    /// Fetches a page, pinning it.
    ///
    /// On a directory hit the page is pinned and withdrawn from the LRU.
    /// On a miss a victim frame is chosen (free list first, then LRU),
    /// written back if dirty, and the page is read from disk into it.
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        let mut core = self.latch.lock();

        if let Some(frame_id) = core.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            core.replacer.erase(&frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.get_victim(&mut core)?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Err(e) = self.evict_frame(&mut core, frame_id) {
            self.stash_free(&mut core, frame_id);
            return Err(e);
        }

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                self.stash_free(&mut core, frame_id);
                return Err(e);
            }
        }
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        frame.set_dirty(false);
        core.page_table.insert(page_id, frame_id);
        trace!("fetched page {} into {}", page_id, frame_id);

        Ok(Arc::clone(frame))
    }

    /// Allocates a brand-new page, pinning it.
    ///
    /// A victim frame is chosen and cleaned as in `fetch_page`, a fresh page
    /// id is taken from the disk manager, and the frame is zeroed.
    pub fn new_page(&self) -> Result<(PageId, Arc<Page>)> {
        let mut core = self.latch.lock();

        let frame_id = self.get_victim(&mut core)?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Err(e) = self.evict_frame(&mut core, frame_id) {
            self.stash_free(&mut core, frame_id);
            return Err(e);
        }

        let page_id = match self.disk.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                self.stash_free(&mut core, frame_id);
                return Err(e);
            }
        };
        frame.write_data().fill(0);
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        frame.set_dirty(false);
        core.page_table.insert(page_id, frame_id);
        trace!("allocated page {} into {}", page_id, frame_id);

        Ok((page_id, Arc::clone(frame)))
    }

    /// Drops one pin on a page, OR-ing in the caller's dirty flag.
    ///
    /// Returns false if the page is not resident. When the pin count reaches
    /// zero the frame becomes evictable. Unpin never clears dirtiness.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut core = self.latch.lock();

        let Some(frame_id) = core.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            core.replacer.insert(frame_id);
        }
        true
    }

    /// Writes a resident page back to disk if dirty and clears the flag.
    ///
    /// Returns `Ok(false)` for `INVALID_PAGE_ID` or a non-resident page,
    /// `Ok(true)` otherwise — including when the page was already clean and
    /// no write happened. Waits for the page latch, so flush from a
    /// quiescent point, not from inside an index operation.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let core = self.latch.lock();

        let Some(frame_id) = core.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            drop(data);
            frame.set_dirty(false);
        }
        Ok(true)
    }

    /// Flushes every dirty resident page. Returns how many were written.
    pub fn flush_all(&self) -> Result<usize> {
        let _core = self.latch.lock();

        let mut flushed = 0;
        for frame in self.frames.iter() {
            if !frame.is_free() && frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(frame.page_id(), &data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Deletes a page from the pool and deallocates it on disk.
    ///
    /// Returns `Ok(false)` if the page is resident and pinned. Otherwise the
    /// frame (if any) is reset onto the free list and the disk id is
    /// released regardless of residency.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut core = self.latch.lock();

        if let Some(frame_id) = core.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return Ok(false);
            }
            core.replacer.erase(&frame_id);
            core.page_table.remove(&page_id);
            frame.reset();
            core.free_list.push_back(frame_id);
        }
        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns true if every frame has pin count zero. Used by tests to
    /// prove operations released everything they touched.
    pub fn check_all_unpinned(&self) -> bool {
        let _core = self.latch.lock();

        let mut all_unpinned = true;
        for frame in self.frames.iter() {
            if frame.pin_count() != 0 {
                debug!(
                    "page {} still pinned, pin count {}",
                    frame.page_id(),
                    frame.pin_count()
                );
                all_unpinned = false;
            }
        }
        all_unpinned
    }

    /// Picks a victim frame: the free list first, then the LRU selector.
    fn get_victim(&self, core: &mut PoolCore) -> Result<FrameId> {
        if let Some(frame_id) = core.free_list.pop_front() {
            debug_assert!(self.frames[frame_id.0 as usize].is_free());
            return Ok(frame_id);
        }
        let frame_id = core.replacer.victim().ok_or(OxbowError::BufferPoolFull)?;
        debug_assert_eq!(self.frames[frame_id.0 as usize].pin_count(), 0);
        Ok(frame_id)
    }

    /// Writes a victim frame back if dirty and unmaps its old page.
    fn evict_frame(&self, core: &mut PoolCore, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id.0 as usize];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            debug!("evicting dirty page {} from {}", old_page_id, frame_id);
            let data = frame.read_data();
            self.disk.write_page(old_page_id, &data)?;
        }
        if old_page_id != INVALID_PAGE_ID {
            core.page_table.remove(&old_page_id);
        }
        Ok(())
    }

    /// Returns a half-evicted frame to the free list after an I/O failure so
    /// the pool stays consistent.
    fn stash_free(&self, core: &mut PoolCore, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0 as usize];
        let old_page_id = frame.page_id();
        if old_page_id != INVALID_PAGE_ID {
            core.page_table.remove(&old_page_id);
        }
        frame.reset();
        core.free_list.push_back(frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDiskManager;

    fn create_test_pool(pool_size: usize) -> BufferPoolManager {
        BufferPoolManager::with_pool_size(pool_size, Arc::new(MemoryDiskManager::new()))
    }

    #[test]
    fn test_pool_config_from_storage_config() {
        let storage = StorageConfig {
            pool_size: 8,
            bucket_capacity: 4,
            ..Default::default()
        };
        let config = BufferPoolConfig::from(&storage);
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.bucket_capacity, 4);
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.pool_size(), 10);
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);

        let (page_id, page) = pool.new_page().unwrap();
        assert_eq!(page.page_id(), page_id);
        assert_eq!(page.pin_count(), 1);
        assert!(!page.is_dirty());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_hit_pins_again() {
        let pool = create_test_pool(10);
        let (page_id, _) = pool.new_page().unwrap();

        let page = pool.fetch_page(page_id).unwrap();
        assert_eq!(page.pin_count(), 2);

        pool.unpin_page(page_id, false);
        pool.unpin_page(page_id, false);
        assert!(pool.check_all_unpinned());
    }

    #[test]
    fn test_buffer_pool_unpin_unknown_page() {
        let pool = create_test_pool(10);
        assert!(!pool.unpin_page(99, false));
    }

    #[test]
    fn test_buffer_pool_dirty_accumulates() {
        let pool = create_test_pool(10);
        let (page_id, page) = pool.new_page().unwrap();

        pool.unpin_page(page_id, true);
        pool.fetch_page(page_id).unwrap();
        // a clean unpin must not clear the dirty flag
        pool.unpin_page(page_id, false);
        assert!(page.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction_roundtrip() {
        let disk = Arc::new(MemoryDiskManager::new());
        let pool = BufferPoolManager::with_pool_size(1, Arc::clone(&disk) as Arc<dyn DiskManager>);

        let (pid1, page) = pool.new_page().unwrap();
        page.write_data()[0] = 0xAB;
        pool.unpin_page(pid1, true);

        // allocating a second page evicts the first, writing it back
        let (pid2, _) = pool.new_page().unwrap();
        assert!(!pool.contains(pid1));
        pool.unpin_page(pid2, false);

        // fetching it again reloads the written bytes from disk
        let page = pool.fetch_page(pid1).unwrap();
        assert_eq!(page.read_data()[0], 0xAB);
        pool.unpin_page(pid1, false);
    }

    #[test]
    fn test_buffer_pool_fetch_all_pinned_fails() {
        let pool = create_test_pool(2);

        // E2: two pinned pages exhaust a pool of two
        let p1 = pool.fetch_page(1).unwrap();
        let p1_again = pool.fetch_page(1).unwrap();
        assert_eq!(p1_again.pin_count(), 2);
        let _p2 = pool.fetch_page(2).unwrap();

        let result = pool.fetch_page(3);
        assert!(matches!(result, Err(OxbowError::BufferPoolFull)));
        drop(p1);
    }

    #[test]
    fn test_buffer_pool_free_list_preferred_over_lru() {
        let pool = create_test_pool(2);

        let (pid1, _) = pool.new_page().unwrap();
        pool.unpin_page(pid1, false);

        // one frame is still free; allocating must use it, not evict pid1
        let (pid2, _) = pool.new_page().unwrap();
        assert!(pool.contains(pid1));
        assert!(pool.contains(pid2));
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let pool = create_test_pool(10);
        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let pool = create_test_pool(10);
        let (page_id, _) = pool.new_page().unwrap();

        assert!(!pool.delete_page(page_id).unwrap());
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_delete_nonresident_page() {
        let pool = create_test_pool(10);
        // not resident: disk deallocation still happens, call succeeds
        assert!(pool.delete_page(42).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let pool = create_test_pool(10);
        let (page_id, page) = pool.new_page().unwrap();
        page.write_data()[0] = 0x11;
        pool.unpin_page(page_id, true);

        // E6: first flush writes and clears the flag
        assert!(pool.flush_page(page_id).unwrap());
        assert!(!page.is_dirty());

        // second flush is a no-op but still reports success
        assert!(pool.flush_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_invalid_and_unknown() {
        let pool = create_test_pool(10);
        assert!(!pool.flush_page(INVALID_PAGE_ID).unwrap());
        assert!(!pool.flush_page(12345).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let pool = create_test_pool(10);

        for _ in 0..5 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, true);
        }
        assert_eq!(pool.flush_all().unwrap(), 5);
        assert_eq!(pool.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_buffer_pool_lru_eviction_order() {
        let pool = create_test_pool(3);

        let mut pids = Vec::new();
        for _ in 0..3 {
            let (pid, _) = pool.new_page().unwrap();
            pids.push(pid);
        }
        // unpin in reverse: pids[2] becomes the oldest evictable frame
        pool.unpin_page(pids[2], false);
        pool.unpin_page(pids[1], false);
        pool.unpin_page(pids[0], false);

        pool.new_page().unwrap();
        assert!(!pool.contains(pids[2]));
        assert!(pool.contains(pids[1]));
        assert!(pool.contains(pids[0]));
    }

    #[test]
    fn test_buffer_pool_fetch_refreshes_lru() {
        let pool = create_test_pool(2);

        let (pid1, _) = pool.new_page().unwrap();
        let (pid2, _) = pool.new_page().unwrap();
        pool.unpin_page(pid1, false);
        pool.unpin_page(pid2, false);

        // touch pid1 so pid2 is the LRU victim
        pool.fetch_page(pid1).unwrap();
        pool.unpin_page(pid1, false);

        pool.new_page().unwrap();
        assert!(pool.contains(pid1));
        assert!(!pool.contains(pid2));
    }
}
