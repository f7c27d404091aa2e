//! Configuration structures for the Oxbow storage engine.

use crate::types::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the data file.
    pub data_path: PathBuf,
    /// Buffer pool size in number of frames.
    pub pool_size: usize,
    /// Capacity of each bucket in the page directory.
    pub bucket_capacity: usize,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./oxbow.db"),
            pool_size: 1024, // 4 MB with 4 KB pages
            bucket_capacity: 50,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn pool_size_bytes(&self) -> usize {
        self.pool_size * PAGE_SIZE
    }
}
