//! Disk managers for page-level I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use oxbow_common::types::{PageData, PageId, PAGE_SIZE};
use oxbow_common::{Result, StorageConfig};

/// Page-level I/O consumed by the buffer pool.
///
/// Page ids are allocated monotonically starting at 1; page 0 is reserved
/// for the header page and reads back zero-filled until first written.
pub trait DiskManager: Send + Sync {
    /// Fills `buf` with the on-disk content of `page_id`.
    fn read_page(&self, page_id: PageId, buf: &mut PageData) -> Result<()>;

    /// Durably writes `data` at `page_id`.
    fn write_page(&self, page_id: PageId, data: &PageData) -> Result<()>;

    /// Returns a fresh page id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Releases a page id. Idempotent.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}

/// Configuration for the file-backed disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path of the data file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./oxbow.db"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            path: config.data_path.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// File-backed disk manager storing all pages in one data file.
pub struct FileDiskManager {
    config: DiskManagerConfig,
    file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl FileDiskManager {
    /// Opens or creates the data file at the configured path.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as i32;

        Ok(Self {
            config,
            file: Mutex::new(file),
            // page 0 is the header page, never handed out
            next_page_id: AtomicI32::new(num_pages.max(1)),
        })
    }

    /// Opens or creates a data file at `path` with fsync disabled, the
    /// usual setup for tests.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(DiskManagerConfig {
            path: path.as_ref().to_path_buf(),
            fsync_enabled: false,
        })
    }

    /// Returns the number of pages the file has room for.
    pub fn num_pages(&self) -> i32 {
        self.next_page_id.load(Ordering::Acquire)
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut PageData) -> Result<()> {
        let mut file = self.file.lock();
        let offset = (page_id as u64) * (PAGE_SIZE as u64);
        file.seek(SeekFrom::Start(offset))?;

        // a page that was allocated but never written reads back as zeroes
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &PageData) -> Result<()> {
        let mut file = self.file.lock();
        let offset = (page_id as u64) * (PAGE_SIZE as u64);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if self.config.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        Ok(self.next_page_id.fetch_add(1, Ordering::AcqRel))
    }

    fn deallocate_page(&self, _page_id: PageId) -> Result<()> {
        // page ids are monotonic; freed pages are not reused
        Ok(())
    }
}

/// In-memory disk manager for tests and ephemeral stores.
pub struct MemoryDiskManager {
    pages: Mutex<HashMap<PageId, Box<PageData>>>,
    next_page_id: AtomicI32,
}

impl MemoryDiskManager {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            next_page_id: AtomicI32::new(1),
        }
    }
}

impl Default for MemoryDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut PageData) -> Result<()> {
        let pages = self.pages.lock();
        match pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&**data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &PageData) -> Result<()> {
        self.pages.lock().insert(page_id, Box::new(*data));
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        Ok(self.next_page_id.fetch_add(1, Ordering::AcqRel))
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.pages.lock().remove(&page_id);
        Ok(())
    }
}
