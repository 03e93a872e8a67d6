//! # Leaf Node Views
//!
//! A leaf stores up to `max_leaf` fixed-size records directly after the
//! header, sorted ascending by key:
//!
//! ```text
//! +------------------+
//! | Header (6 bytes) |
//! +------------------+
//! | key0 | value0    |
//! | key1 | value1    |
//! | ...              |
//! +------------------+
//! | zero tail        |
//! +------------------+
//! ```
//!
//! `LeafNode` borrows a page buffer immutably and returns key/value slices
//! pointing straight into it; `LeafNodeMut` appends records in place. The
//! write path only ever appends: records arrive in key order and a page is
//! never edited after it is persisted.

use eyre::{ensure, Result};

use crate::config::{KeyCompare, TreeConfig};
use crate::node::{NodeHeader, NODE_HEADER_SIZE};

/// Outcome of an exact-match search inside a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

#[derive(Debug)]
pub struct LeafNode<'a> {
    data: &'a [u8],
    cfg: &'a TreeConfig,
}

pub struct LeafNodeMut<'a> {
    data: &'a mut [u8],
    cfg: &'a TreeConfig,
}

impl<'a> LeafNode<'a> {
    pub fn new(data: &'a [u8], cfg: &'a TreeConfig) -> Result<Self> {
        ensure!(
            data.len() == cfg.page_size,
            "invalid page size: {} != {}",
            data.len(),
            cfg.page_size
        );
        Ok(Self { data, cfg })
    }

    pub fn count(&self) -> usize {
        let header = NodeHeader::from_bytes(self.data).unwrap(); // INVARIANT: length checked in new
        header.count() as usize
    }

    fn record_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * self.cfg.record_size
    }

    pub fn key_at(&self, index: usize) -> &'a [u8] {
        debug_assert!(index < self.count());
        let off = self.record_offset(index);
        &self.data[off..off + self.cfg.key_size]
    }

    pub fn value_at(&self, index: usize) -> &'a [u8] {
        debug_assert!(index < self.count());
        let off = self.record_offset(index) + self.cfg.key_size;
        &self.data[off..off + self.cfg.data_size]
    }

    /// Smallest key in the leaf. Valid only for a non-empty leaf.
    pub fn min_key(&self) -> &'a [u8] {
        self.key_at(0)
    }

    /// Largest key in the leaf. Valid only for a non-empty leaf.
    pub fn max_key(&self) -> &'a [u8] {
        self.key_at(self.count() - 1)
    }

    /// Index of the first record whose key is not below `key`.
    pub fn lower_bound(&self, key: &[u8], compare: KeyCompare) -> usize {
        let mut lo = 0;
        let mut hi = self.count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if compare(self.key_at(mid), key) == std::cmp::Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Exact-match binary search.
    pub fn find(&self, key: &[u8], compare: KeyCompare) -> SearchResult {
        let pos = self.lower_bound(key, compare);
        if pos < self.count() && compare(self.key_at(pos), key) == std::cmp::Ordering::Equal {
            SearchResult::Found(pos)
        } else {
            SearchResult::NotFound(pos)
        }
    }
}

impl<'a> LeafNodeMut<'a> {
    pub fn new(data: &'a mut [u8], cfg: &'a TreeConfig) -> Result<Self> {
        ensure!(
            data.len() == cfg.page_size,
            "invalid page size: {} != {}",
            data.len(),
            cfg.page_size
        );
        Ok(Self { data, cfg })
    }

    fn header_mut(&mut self) -> &mut NodeHeader {
        NodeHeader::from_bytes_mut(self.data).unwrap() // INVARIANT: length checked in new
    }

    pub fn count(&self) -> usize {
        let header = NodeHeader::from_bytes(self.data).unwrap(); // INVARIANT: length checked in new
        header.count() as usize
    }

    /// Appends a record at the end of the leaf.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let count = self.count();
        ensure!(
            count < self.cfg.max_leaf,
            "leaf full: {} records",
            count
        );

        let off = NODE_HEADER_SIZE + count * self.cfg.record_size;
        self.data[off..off + self.cfg.key_size].copy_from_slice(key);
        self.data[off + self.cfg.key_size..off + self.cfg.record_size].copy_from_slice(value);
        self.header_mut().bump_count();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::compare_unsigned_le;

    fn cfg() -> TreeConfig {
        TreeConfig::new(4, 4).page_size(64).validated().unwrap()
    }

    fn filled_page(cfg: &TreeConfig, keys: &[u32]) -> Vec<u8> {
        let mut page = vec![0u8; cfg.page_size];
        {
            let mut leaf = LeafNodeMut::new(&mut page, cfg).unwrap();
            for &k in keys {
                leaf.append(&k.to_le_bytes(), &(k * 2).to_le_bytes()).unwrap();
            }
        }
        page
    }

    #[test]
    fn append_then_read_back() {
        let cfg = cfg();
        let page = filled_page(&cfg, &[3, 7, 11]);
        let leaf = LeafNode::new(&page, &cfg).unwrap();

        assert_eq!(leaf.count(), 3);
        assert_eq!(leaf.key_at(1), 7u32.to_le_bytes());
        assert_eq!(leaf.value_at(2), 22u32.to_le_bytes());
        assert_eq!(leaf.min_key(), 3u32.to_le_bytes());
        assert_eq!(leaf.max_key(), 11u32.to_le_bytes());
    }

    #[test]
    fn append_rejects_overflow() {
        let cfg = cfg();
        let keys: Vec<u32> = (0..cfg.max_leaf as u32).collect();
        let mut page = filled_page(&cfg, &keys);
        let mut leaf = LeafNodeMut::new(&mut page, &cfg).unwrap();

        let result = leaf.append(&99u32.to_le_bytes(), &0u32.to_le_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn find_hits_and_misses() {
        let cfg = cfg();
        let page = filled_page(&cfg, &[10, 20, 30, 40]);
        let leaf = LeafNode::new(&page, &cfg).unwrap();

        assert_eq!(
            leaf.find(&30u32.to_le_bytes(), compare_unsigned_le),
            SearchResult::Found(2)
        );
        assert_eq!(
            leaf.find(&25u32.to_le_bytes(), compare_unsigned_le),
            SearchResult::NotFound(2)
        );
        assert_eq!(
            leaf.find(&50u32.to_le_bytes(), compare_unsigned_le),
            SearchResult::NotFound(4)
        );
    }

    #[test]
    fn lower_bound_on_empty_leaf() {
        let cfg = cfg();
        let page = vec![0u8; cfg.page_size];
        let leaf = LeafNode::new(&page, &cfg).unwrap();

        assert_eq!(leaf.lower_bound(&5u32.to_le_bytes(), compare_unsigned_le), 0);
    }
}
