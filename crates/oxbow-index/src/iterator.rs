//! Leaf-chain iterator.

use crate::codec::{KeyComparator, Storable};
use crate::page::{self, leaf};
use crate::tree::BPlusTree;
use std::sync::Arc;
use oxbow_buffer::{Page, PageReadGuard};
use oxbow_common::types::INVALID_PAGE_ID;

/// Iterator over a tree's entries in ascending key order.
///
/// Holds one pinned, read-latched leaf and an in-page index. Advancing past
/// a leaf's last entry releases it (latch first, then pin, exactly once)
/// and follows `next_page_id`. A terminal iterator holds nothing.
pub struct TreeIterator<'a, K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    tree: &'a BPlusTree<K, V, C>,
    leaf: Option<(Arc<Page>, PageReadGuard)>,
    index: usize,
}

impl<'a, K, V, C> TreeIterator<'a, K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    pub(crate) fn new(
        tree: &'a BPlusTree<K, V, C>,
        leaf: Option<(Arc<Page>, PageReadGuard)>,
        index: usize,
    ) -> Self {
        Self { tree, leaf, index }
    }

    /// Returns true once the iterator has run off the end of the chain.
    pub fn is_terminal(&self) -> bool {
        self.leaf.is_none()
    }

    fn release_leaf(&mut self) {
        if let Some((leaf_page, guard)) = self.leaf.take() {
            let page_id = leaf_page.page_id();
            drop(guard);
            self.tree.pool().unpin_page(page_id, false);
        }
    }
}

impl<K, V, C> Iterator for TreeIterator<'_, K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let step = {
                let (_, guard) = self.leaf.as_ref()?;
                let data = &guard[..];
                if (self.index as i32) < page::size(data) {
                    Ok(leaf::entry_at::<K, V>(data, self.index))
                } else {
                    Err(leaf::next_page_id(data))
                }
            };
            match step {
                Ok(entry) => {
                    self.index += 1;
                    return Some(entry);
                }
                Err(next_page_id) => {
                    self.release_leaf();
                    if next_page_id == INVALID_PAGE_ID {
                        return None;
                    }
                    // follow the chain; a pool failure ends the scan
                    let leaf_page = self.tree.pool().fetch_page(next_page_id).ok()?;
                    let guard = leaf_page.rlatch();
                    self.leaf = Some((leaf_page, guard));
                    self.index = 0;
                }
            }
        }
    }
}

impl<K, V, C> Drop for TreeIterator<'_, K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    fn drop(&mut self) {
        self.release_leaf();
    }
}
