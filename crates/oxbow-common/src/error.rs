//! Error types for the Oxbow storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias using OxbowError.
pub type Result<T> = std::result::Result<T, OxbowError>;

/// Errors that can occur in Oxbow storage operations.
#[derive(Debug, Error)]
pub enum OxbowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool full, all frames pinned")]
    BufferPoolFull,

    #[error("page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("page {page_id} is pinned")]
    PagePinned { page_id: PageId },

    // Index errors
    #[error("index not found in header page: {0}")]
    IndexNotFound(String),

    #[error("header page full, cannot record index {0}")]
    HeaderPageFull(String),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: OxbowError = io_err.into();
        assert!(matches!(err, OxbowError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = OxbowError::BufferPoolFull;
        assert_eq!(err.to_string(), "buffer pool full, all frames pinned");
    }

    #[test]
    fn test_page_not_found_display() {
        let err = OxbowError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "page not found: 42");
    }

    #[test]
    fn test_page_pinned_display() {
        let err = OxbowError::PagePinned { page_id: 7 };
        assert_eq!(err.to_string(), "page 7 is pinned");
    }

    #[test]
    fn test_index_errors_display() {
        let err = OxbowError::IndexNotFound("orders_pk".to_string());
        assert_eq!(err.to_string(), "index not found in header page: orders_pk");

        let err = OxbowError::IndexCorrupted("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "index corrupted: leaf chain broken");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(OxbowError::BufferPoolFull)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OxbowError>();
    }
}
