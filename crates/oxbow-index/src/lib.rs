//! Concurrent B+tree index for the Oxbow storage engine.
//!
//! This crate provides:
//! - Fixed-width key/value codecs and the comparator seam
//! - Tagged page views for leaf and internal B+tree nodes
//! - The header page mapping index names to root page ids
//! - A latch-crabbing B+tree over the buffer pool, with a leaf-chain
//!   iterator

pub mod codec;
pub mod iterator;
pub mod page;
pub mod transaction;
pub mod tree;

pub use codec::{KeyComparator, OrdComparator, Storable};
pub use iterator::TreeIterator;
pub use transaction::Transaction;
pub use tree::BPlusTree;
