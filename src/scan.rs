//! # Range Scan Cursor
//!
//! A single-pass cursor over the records whose keys fall in `[min, max]`,
//! emitted in key order. The cursor keeps one page position per tree
//! level (a child index at each interior level, a record index at the
//! leaf) and advances like an odometer: when the leaf runs out, the lowest level
//! that still has children moves one step right and everything below it
//! restarts at its leftmost page.
//!
//! ```text
//! level 0 (root)      [ . . c0 . ]          c0 = cursors[0]
//! level 1             [ c1 . . ]
//! leaf level          [ records ] c_leaf
//! ```
//!
//! The cursor holds `&mut SeqTree` for its whole lifetime, so the borrow
//! checker rules out interleaved inserts: the active path the cursor
//! remaps through cannot shift underneath it. Pages themselves are
//! immutable once written, which is what makes the per-level snapshot
//! sound.
//!
//! Storage read failures terminate the scan (the adapter contract treats
//! them as end-of-iteration). Keys below `min` can surface at the very
//! first position and are skipped; the first key above `max` ends the
//! scan.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::config::{MAX_KEY_SIZE, MAX_LEVELS};
use crate::node::{InteriorNode, LeafNode};
use crate::storage::PageStore;
use crate::tree::SeqTree;

enum Step {
    End,
    Advance,
    Skip,
    Emit,
}

/// In-order cursor over a key range. Obtain with
/// [`SeqTree::scan`](crate::SeqTree::scan); drive with [`next`](Self::next).
pub struct RangeScan<'t, S: PageStore> {
    tree: &'t mut SeqTree<S>,
    min_key: [u8; MAX_KEY_SIZE],
    max_key: [u8; MAX_KEY_SIZE],
    has_min: bool,
    has_max: bool,
    pages: [u32; MAX_LEVELS + 1],
    cursors: [usize; MAX_LEVELS + 1],
    height: usize,
    done: bool,
}

impl<'t, S: PageStore> RangeScan<'t, S> {
    pub(crate) fn init(
        tree: &'t mut SeqTree<S>,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
    ) -> Result<Self> {
        let ks = tree.cfg.key_size;
        let mut min_key = [0u8; MAX_KEY_SIZE];
        let mut max_key = [0u8; MAX_KEY_SIZE];
        if let Some(min) = min {
            ensure!(min.len() == ks, "min bound size {} != key size {}", min.len(), ks);
            min_key[..ks].copy_from_slice(min);
        }
        if let Some(max) = max {
            ensure!(max.len() == ks, "max bound size {} != key size {}", max.len(), ks);
            max_key[..ks].copy_from_slice(max);
        }

        let height = tree.path.height();
        let mut pages = [0u32; MAX_LEVELS + 1];
        let mut cursors = [0usize; MAX_LEVELS + 1];
        let mut done = false;

        // Prime the cursor: descend towards the first leaf that can hold
        // keys at or above the lower bound.
        let mut phys = tree.path.root();
        for level in 0..height {
            pages[level] = phys;
            let frame = match tree.pool.read(phys, &mut tree.path) {
                Ok(frame) => frame,
                Err(_) => {
                    done = true;
                    break;
                }
            };
            let node = InteriorNode::new(tree.pool.frame(frame), &tree.cfg)?;
            let count = node.count();
            let idx = if min.is_some() {
                node.child_index(&min_key[..ks], tree.cfg.compare)
            } else {
                0
            };
            cursors[level] = idx;
            let resolved = tree
                .path
                .resolve_child(level, phys, idx, count, node.child_at(idx));
            if resolved == 0 {
                done = true;
                break;
            }
            phys = resolved;
        }

        if !done {
            pages[height] = phys;
            match tree.pool.read(phys, &mut tree.path) {
                Ok(frame) => {
                    let leaf = LeafNode::new(tree.pool.frame(frame), &tree.cfg)?;
                    cursors[height] = if min.is_some() {
                        leaf.lower_bound(&min_key[..ks], tree.cfg.compare)
                    } else {
                        0
                    };
                }
                Err(_) => done = true,
            }
        }

        Ok(Self {
            tree,
            min_key,
            max_key,
            has_min: min.is_some(),
            has_max: max.is_some(),
            pages,
            cursors,
            height,
            done,
        })
    }

    /// Returns the next in-range record, or `None` once the range is
    /// exhausted. The returned slices borrow the pool frame holding the
    /// current leaf and stay valid until the next call.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let leaf_phys = self.pages[self.height];
            let cursor = self.cursors[self.height];

            let step = {
                let tree = &mut *self.tree;
                match tree.pool.read(leaf_phys, &mut tree.path) {
                    Err(_) => Step::End,
                    Ok(frame) => {
                        let leaf = LeafNode::new(tree.pool.frame(frame), &tree.cfg)?;
                        if cursor >= leaf.count() {
                            Step::Advance
                        } else {
                            let ks = tree.cfg.key_size;
                            let key = leaf.key_at(cursor);
                            if self.has_max
                                && (tree.cfg.compare)(key, &self.max_key[..ks])
                                    == Ordering::Greater
                            {
                                Step::End
                            } else if self.has_min
                                && (tree.cfg.compare)(key, &self.min_key[..ks]) == Ordering::Less
                            {
                                Step::Skip
                            } else {
                                Step::Emit
                            }
                        }
                    }
                }
            };

            match step {
                Step::End => {
                    self.done = true;
                    return Ok(None);
                }
                Step::Advance => {
                    if !self.advance()? {
                        self.done = true;
                        return Ok(None);
                    }
                }
                Step::Skip => {
                    self.cursors[self.height] += 1;
                }
                Step::Emit => {
                    self.cursors[self.height] += 1;
                    let tree = &mut *self.tree;
                    let frame = match tree.pool.read(leaf_phys, &mut tree.path) {
                        Ok(frame) => frame,
                        Err(_) => {
                            self.done = true;
                            return Ok(None);
                        }
                    };
                    let leaf = LeafNode::new(tree.pool.frame(frame), &tree.cfg)?;
                    return Ok(Some((leaf.key_at(cursor), leaf.value_at(cursor))));
                }
            }
        }
    }

    /// Moves the odometer one leaf to the right: the lowest interior level
    /// with children remaining advances, everything below restarts at its
    /// leftmost page. Returns `false` when the whole tree is exhausted.
    fn advance(&mut self) -> Result<bool> {
        let mut level = self.height;
        loop {
            if level == 0 {
                return Ok(false);
            }
            level -= 1;
            self.cursors[level] += 1;

            let next_child = {
                let tree = &mut *self.tree;
                let frame = match tree.pool.read(self.pages[level], &mut tree.path) {
                    Ok(frame) => frame,
                    Err(_) => return Ok(false),
                };
                let node = InteriorNode::new(tree.pool.frame(frame), &tree.cfg)?;
                let count = node.count();
                let idx = self.cursors[level];
                if idx > count {
                    None
                } else {
                    let resolved = tree.path.resolve_child(
                        level,
                        self.pages[level],
                        idx,
                        count,
                        node.child_at(idx),
                    );
                    // A zero tail means that part of the key space is
                    // still in the write buffer.
                    (resolved != 0).then_some(resolved)
                }
            };

            let Some(mut child) = next_child else {
                continue;
            };

            for l in level + 1..=self.height {
                self.pages[l] = child;
                self.cursors[l] = 0;
                if l == self.height {
                    break;
                }
                let resolved = {
                    let tree = &mut *self.tree;
                    let frame = match tree.pool.read(child, &mut tree.path) {
                        Ok(frame) => frame,
                        Err(_) => return Ok(false),
                    };
                    let node = InteriorNode::new(tree.pool.frame(frame), &tree.cfg)?;
                    let count = node.count();
                    tree.path
                        .resolve_child(l, child, 0, count, node.child_at(0))
                };
                if resolved == 0 {
                    return Ok(false);
                }
                child = resolved;
            }
            return Ok(true);
        }
    }
}
