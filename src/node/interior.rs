//! # Interior Node Views
//!
//! An interior node partitions the key space over its children:
//!
//! ```text
//! +------------------------------------+
//! | Header (6 bytes)                   |
//! +------------------------------------+
//! | separator keys, max_int slots      |
//! +------------------------------------+
//! | child page ids, max_int + 1 slots  |
//! +------------------------------------+
//! ```
//!
//! With `n` separators, pointer `i < n` leads to keys below `keys[i]` and
//! pointer `n` to keys at or above `keys[n-1]`. Because pages are written
//! copy-on-write, the rightmost pointer of the node currently under
//! construction goes stale as its child is rewritten; readers resolve it
//! through the engine's active path instead of trusting the stored value.
//! At the lowest interior level the slot after the last finished leaf is
//! left zero until that part of the key space is persisted.

use eyre::{ensure, Result};

use crate::config::{KeyCompare, TreeConfig, PAGE_ID_SIZE};
use crate::node::{NodeHeader, NODE_HEADER_SIZE};

#[derive(Debug)]
pub struct InteriorNode<'a> {
    data: &'a [u8],
    cfg: &'a TreeConfig,
}

pub struct InteriorNodeMut<'a> {
    data: &'a mut [u8],
    cfg: &'a TreeConfig,
}

impl<'a> InteriorNode<'a> {
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

    pub fn is_root(&self) -> bool {
        let header = NodeHeader::from_bytes(self.data).unwrap(); // INVARIANT: length checked in new
        header.is_root()
    }

    pub fn is_interior(&self) -> bool {
        let header = NodeHeader::from_bytes(self.data).unwrap(); // INVARIANT: length checked in new
        header.is_interior()
    }

    pub fn key_at(&self, index: usize) -> &'a [u8] {
        debug_assert!(index < self.count());
        let off = NODE_HEADER_SIZE + index * self.cfg.key_size;
        &self.data[off..off + self.cfg.key_size]
    }

    /// Stored child pointer at `index`. The rightmost slot of a node on the
    /// active path must be remapped by the caller before use.
    pub fn child_at(&self, index: usize) -> u32 {
        debug_assert!(index <= self.cfg.max_int);
        let off = self.cfg.child_array_offset() + index * PAGE_ID_SIZE;
        u32::from_le_bytes(self.data[off..off + PAGE_ID_SIZE].try_into().unwrap())
    }

    /// Pointer index for `key`: the position of the first separator that
    /// compares strictly greater, or `count` for the rightmost subtree.
    pub fn child_index(&self, key: &[u8], compare: KeyCompare) -> usize {
        let mut lo = 0;
        let mut hi = self.count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if compare(self.key_at(mid), key) == std::cmp::Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }
}

impl<'a> InteriorNodeMut<'a> {
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

    pub fn mark_interior(&mut self) {
        self.header_mut().set_interior();
    }

    pub fn mark_root(&mut self) {
        self.header_mut().set_root();
    }

    pub fn set_key(&mut self, index: usize, key: &[u8]) {
        debug_assert!(index < self.cfg.max_int);
        let off = NODE_HEADER_SIZE + index * self.cfg.key_size;
        self.data[off..off + self.cfg.key_size].copy_from_slice(key);
    }

    pub fn set_child(&mut self, index: usize, page_id: u32) {
        debug_assert!(index <= self.cfg.max_int);
        let off = self.cfg.child_array_offset() + index * PAGE_ID_SIZE;
        self.data[off..off + PAGE_ID_SIZE].copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn bump_count(&mut self) {
        self.header_mut().bump_count();
    }
}
