//! # Sequential Copy-on-Write Tree Engine
//!
//! The engine ingests records in key order, appends them to a single
//! in-memory leaf, and maintains the interior levels lazily along an
//! *active path*, the in-memory list of the current physical id of every
//! interior node between the root and the open leaf.
//!
//! ## Why an Active Path
//!
//! Pages are immutable once written: every edit of an interior node
//! produces a new physical page. Rewriting every ancestor on each leaf
//! write would turn one leaf flush into `height` page writes. Instead,
//! only the lowest interior node is rewritten per leaf, and the stale
//! rightmost pointers of the ancestors are shadowed by the active path:
//! every descent resolves the rightmost pointer of an on-path node through
//! the array rather than the stored value.
//!
//! ## Insert Path
//!
//! ```text
//! put(key, value)
//!   1. write buffer full? persist it, remember its min key,
//!      update_index(min, key, leaf_id), reset the buffer
//!   2. append the record to the write buffer
//!
//! update_index, walking the active path bottom-up:
//!   node has room   -> add separator + child, rewrite node CoW, stop
//!   node full       -> stamp its stale tail (non-bottom levels),
//!                      start a fresh node at this level, continue up
//!   past the root   -> grow: new root over (old subtree, fresh subtree)
//! ```
//!
//! The separator added at the lowest interior level is the key currently
//! being inserted (the first key of the next leaf); at higher levels it is
//! the minimum key of the subtree that was just closed out. After a split
//! the key promoted upward is therefore always the smallest key of the
//! right-hand subtree.
//!
//! ## Write Ordering
//!
//! Within one call the engine persists child before parent, so a reader
//! starting from the current root always sees a consistent tree. `flush`
//! additionally closes the spine top to bottom (stamping every stale tail)
//! and writes the root last, which is what allows `reopen` to rebuild the
//! whole state from nothing but the last page of the store.
//!
//! ## Memory
//!
//! Total RAM is `buffer_pages * page_size` plus the fixed-size active
//! path. Nothing is allocated after `open`.

use std::cmp::Ordering;

use eyre::{bail, ensure, eyre, Result};

use crate::buffer::{FramePool, WRITE_FRAME};
use crate::config::{successor_le, TreeConfig, MAX_KEY_SIZE, MAX_LEVELS};
use crate::node::{InteriorNode, InteriorNodeMut, LeafNode, LeafNodeMut, NodeHeader, SearchResult};
use crate::scan::RangeScan;
use crate::storage::PageStore;

/// Current physical page id of every level between the root (slot 0) and
/// the interior node directly above the open leaf.
///
/// The stored rightmost pointers of these nodes go stale as their children
/// are rewritten copy-on-write; the path holds the truth until the next
/// flush stamps it back into the pages.
#[derive(Debug, Clone)]
pub struct ActivePath {
    ids: [u32; MAX_LEVELS],
    height: usize,
}

impl ActivePath {
    pub fn new(root: u32) -> Self {
        let mut ids = [0u32; MAX_LEVELS];
        ids[0] = root;
        Self { ids, height: 1 }
    }

    /// Number of interior levels.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn root(&self) -> u32 {
        self.ids[0]
    }

    pub fn get(&self, level: usize) -> u32 {
        debug_assert!(level < self.height);
        self.ids[level]
    }

    pub fn set(&mut self, level: usize, id: u32) {
        debug_assert!(level < self.height);
        self.ids[level] = id;
    }

    /// Shifts every level down one slot and installs a new root.
    pub(crate) fn grow(&mut self, new_root: u32) -> Result<()> {
        ensure!(
            self.height < MAX_LEVELS,
            "tree exceeds the maximum of {} levels",
            MAX_LEVELS
        );
        self.ids.copy_within(0..self.height, 1);
        self.ids[0] = new_root;
        self.height += 1;
        Ok(())
    }

    /// Appends a level below the current deepest one (reopen path).
    pub(crate) fn push(&mut self, id: u32) -> Result<()> {
        ensure!(
            self.height < MAX_LEVELS,
            "tree exceeds the maximum of {} levels",
            MAX_LEVELS
        );
        self.ids[self.height] = id;
        self.height += 1;
        Ok(())
    }

    /// Applies the active-path remap to a stored child pointer: the
    /// rightmost pointer of the node currently at `active_path[level]` is
    /// shadowed by the id one level down. Everything else is taken as
    /// stored.
    pub fn resolve_child(
        &self,
        level: usize,
        node_phys: u32,
        idx: usize,
        count: usize,
        stored: u32,
    ) -> u32 {
        if node_phys == self.get(level) && idx == count && level + 1 < self.height {
            self.get(level + 1)
        } else {
            stored
        }
    }
}

/// Append-only key/value index over page storage.
///
/// Records must arrive in non-decreasing key order. Lookups and scans see
/// persisted data only; records still in the write buffer become visible
/// after the leaf fills or [`flush`](SeqTree::flush) is called.
pub struct SeqTree<S: PageStore> {
    pub(crate) cfg: TreeConfig,
    pub(crate) pool: FramePool<S>,
    pub(crate) path: ActivePath,
    temp_key: [u8; MAX_KEY_SIZE],
    last_key: [u8; MAX_KEY_SIZE],
    has_records: bool,
    wrote_leaf: bool,
}

impl<S: PageStore> SeqTree<S> {
    /// Creates a new tree on `store`: writes the empty root as page 0 and
    /// leaves frame 0 as the open write buffer.
    pub fn open(cfg: TreeConfig, store: S) -> Result<Self> {
        let cfg = cfg.validated()?;
        let mut pool = FramePool::new(store, cfg.page_size, cfg.buffer_pages)?;

        pool.reset_frame(WRITE_FRAME);
        {
            let header = NodeHeader::from_bytes_mut(pool.frame_mut(WRITE_FRAME))?;
            header.set_interior();
            header.set_root();
        }
        let root = pool.write(WRITE_FRAME)?;
        pool.reset_frame(WRITE_FRAME);

        Ok(Self {
            cfg,
            pool,
            path: ActivePath::new(root),
            temp_key: [0u8; MAX_KEY_SIZE],
            last_key: [0u8; MAX_KEY_SIZE],
            has_records: false,
            wrote_leaf: false,
        })
    }

    /// Reopens a tree that was previously closed with a `flush`: the last
    /// page of the store is the root, and the active path is rebuilt by
    /// descending the rightmost child chain.
    ///
    /// State buffered but never flushed is gone; to keep lookups
    /// well-defined, resume inserting at or above the previous maximum
    /// key.
    pub fn reopen(cfg: TreeConfig, store: S) -> Result<Self> {
        let cfg = cfg.validated()?;
        let mut pool = FramePool::new(store, cfg.page_size, cfg.buffer_pages)?;

        let pages = pool.page_count();
        ensure!(pages >= 1, "store holds no pages");
        let root_phys = pages - 1;

        pool.read_into(root_phys, WRITE_FRAME)?;
        {
            let node = InteriorNode::new(pool.frame(WRITE_FRAME), &cfg)?;
            ensure!(
                node.is_root() && node.is_interior(),
                "page {} is not a root node",
                root_phys
            );
        }

        let mut path = ActivePath::new(root_phys);
        loop {
            let tail = {
                let node = InteriorNode::new(pool.frame(WRITE_FRAME), &cfg)?;
                node.child_at(node.count())
            };
            if tail == 0 {
                break;
            }
            pool.read_into(tail, WRITE_FRAME)?;
            {
                let node = InteriorNode::new(pool.frame(WRITE_FRAME), &cfg)?;
                ensure!(
                    node.is_interior(),
                    "rightmost chain reached non-interior page {}",
                    tail
                );
            }
            path.push(tail)?;
        }

        // Restore the ordering floor from the rightmost leaf so ingestion
        // resumes exactly where the last flush left off.
        let mut last_key = [0u8; MAX_KEY_SIZE];
        let mut has_records = false;
        let ks = cfg.key_size;
        {
            let bottom = InteriorNode::new(pool.frame(WRITE_FRAME), &cfg)?;
            let count = bottom.count();
            if count > 0 {
                let rightmost_leaf = bottom.child_at(count - 1);
                pool.read_into(rightmost_leaf, WRITE_FRAME)?;
                let leaf = LeafNode::new(pool.frame(WRITE_FRAME), &cfg)?;
                if leaf.count() > 0 {
                    last_key[..ks].copy_from_slice(leaf.max_key());
                    successor_le(&mut last_key[..ks]);
                    has_records = true;
                }
            }
        }

        pool.set_positions(pages, pages);
        pool.reset_frame(WRITE_FRAME);

        Ok(Self {
            cfg,
            pool,
            path,
            temp_key: [0u8; MAX_KEY_SIZE],
            last_key,
            has_records,
            wrote_leaf: pages > 1,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.cfg
    }

    /// Depth of the tree: the interior levels plus the leaf level once any
    /// leaf has been persisted.
    pub fn levels(&self) -> usize {
        self.path.height() + usize::from(self.wrote_leaf)
    }

    pub fn stats(&self) -> crate::buffer::PoolStats {
        self.pool.stats()
    }

    /// Number of pages persisted so far; also the physical id the next
    /// write will occupy.
    pub fn pages_written(&self) -> u32 {
        self.pool.next_write_id()
    }

    /// Appends a record. Keys must arrive in non-decreasing order under
    /// the configured comparator.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.cfg.key_size,
            "key size {} != configured {}",
            key.len(),
            self.cfg.key_size
        );
        ensure!(
            value.len() == self.cfg.data_size,
            "value size {} != configured {}",
            value.len(),
            self.cfg.data_size
        );
        if self.has_records
            && (self.cfg.compare)(key, &self.last_key[..self.cfg.key_size]) == Ordering::Less
        {
            bail!("keys must arrive in non-decreasing order");
        }

        let count = LeafNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?.count();
        if count >= self.cfg.max_leaf {
            let leaf_id = self.pool.write(WRITE_FRAME)?;
            self.wrote_leaf = true;

            // The buffer is reused for interior work below; the min key
            // must survive in the scratch slot.
            let ks = self.cfg.key_size;
            {
                let leaf = LeafNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?;
                self.temp_key[..ks].copy_from_slice(leaf.min_key());
            }
            self.update_index(key, leaf_id)?;
            self.pool.reset_frame(WRITE_FRAME);
        }

        let mut leaf = LeafNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
        leaf.append(key, value)?;
        self.last_key[..key.len()].copy_from_slice(key);
        self.has_records = true;
        Ok(())
    }

    /// Registers a freshly persisted leaf in the interior levels, starting
    /// at the lowest one. `self.temp_key` carries the leaf's minimum key.
    /// Returns the level at which the insertion came to rest.
    fn update_index(&mut self, key: &[u8], child_page: u32) -> Result<usize> {
        let ks = self.cfg.key_size;
        let height = self.path.height();
        let mut child = child_page;
        let mut prev: Option<u32> = None;

        for l in (0..height).rev() {
            let deepest = l == height - 1;
            self.pool.read_into(self.path.get(l), WRITE_FRAME)?;
            let count = InteriorNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?.count();

            if count < self.cfg.max_int {
                self.pool.mark_modified(WRITE_FRAME, l as u8);
                {
                    let mut node =
                        InteriorNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
                    if deepest {
                        node.set_key(count, key);
                        node.set_child(count, child);
                    } else {
                        let prev_id = prev
                            .ok_or_else(|| eyre!("no closed subtree below level {}", l))?;
                        node.set_key(count, &self.temp_key[..ks]);
                        node.set_child(count, prev_id);
                        node.set_child(count + 1, child);
                    }
                    node.bump_count();
                }
                let new_id = self.pool.write(WRITE_FRAME)?;
                self.path.set(l, new_id);
                return Ok(l);
            }

            // Level is full. Above the bottom the node's tail still points
            // at a stale child; stamp the final id before abandoning it.
            if !deepest {
                let prev_id = prev.ok_or_else(|| eyre!("no closed subtree below level {}", l))?;
                self.pool.mark_modified(WRITE_FRAME, l as u8);
                {
                    let mut node =
                        InteriorNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
                    node.set_child(count, prev_id);
                }
                let final_id = self.pool.write(WRITE_FRAME)?;
                self.path.set(l, final_id);
            }

            prev = Some(self.path.get(l));

            // Fresh node for this level: at the bottom it gets the new
            // separator and leaf, above only the pointer to the fresh
            // child below; its key space is bounded by the separator the
            // parent is about to receive.
            self.pool.reset_frame(WRITE_FRAME);
            self.pool.mark_modified(WRITE_FRAME, l as u8);
            {
                let mut node = InteriorNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
                node.mark_interior();
                if deepest {
                    node.set_key(0, key);
                    node.set_child(0, child);
                    node.bump_count();
                } else {
                    node.set_child(0, child);
                }
            }
            let new_id = self.pool.write(WRITE_FRAME)?;
            self.path.set(l, new_id);
            child = new_id;
        }

        // The root itself was full: grow one level.
        let prev_id = prev.ok_or_else(|| eyre!("root growth without a closed subtree"))?;
        self.pool.reset_frame(WRITE_FRAME);
        {
            let mut node = InteriorNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
            node.mark_interior();
            node.mark_root();
            node.set_key(0, &self.temp_key[..ks]);
            node.set_child(0, prev_id);
            node.set_child(1, self.path.get(0));
            node.bump_count();
        }
        let new_root = self.pool.write(WRITE_FRAME)?;
        self.path.grow(new_root)?;
        Ok(0)
    }

    /// Point lookup. On a hit the value is copied into `value_out` and
    /// `true` is returned. Storage read failures report as not-found.
    pub fn get(&mut self, key: &[u8], value_out: &mut [u8]) -> Result<bool> {
        ensure!(
            key.len() == self.cfg.key_size,
            "key size {} != configured {}",
            key.len(),
            self.cfg.key_size
        );
        ensure!(
            value_out.len() == self.cfg.data_size,
            "value buffer size {} != configured {}",
            value_out.len(),
            self.cfg.data_size
        );

        let height = self.path.height();
        let mut phys = self.path.get(0);

        for l in 0..height {
            let frame = match self.pool.read(phys, &mut self.path) {
                Ok(f) => f,
                Err(_) => return Ok(false),
            };
            let node = InteriorNode::new(self.pool.frame(frame), &self.cfg)?;
            let count = node.count();
            let idx = node.child_index(key, self.cfg.compare);
            let next = self
                .path
                .resolve_child(l, phys, idx, count, node.child_at(idx));
            if idx == count && next == 0 {
                // Spare tail slot: this part of the key space is still in
                // the write buffer (or was never filled).
                return Ok(false);
            }
            phys = next;
        }

        let frame = match self.pool.read(phys, &mut self.path) {
            Ok(f) => f,
            Err(_) => return Ok(false),
        };
        let leaf = LeafNode::new(self.pool.frame(frame), &self.cfg)?;
        match leaf.find(key, self.cfg.compare) {
            SearchResult::Found(i) => {
                value_out.copy_from_slice(leaf.value_at(i));
                Ok(true)
            }
            SearchResult::NotFound(_) => Ok(false),
        }
    }

    /// Persists the write buffer and closes the tree so that every stored
    /// pointer is current and the root is the last page written. A flush
    /// with an empty buffer only syncs, so flushing twice is the same as
    /// flushing once.
    pub fn flush(&mut self) -> Result<()> {
        let ks = self.cfg.key_size;
        let count = LeafNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?.count();
        if count == 0 {
            return self.pool.sync();
        }

        let leaf_id = self.pool.write(WRITE_FRAME)?;
        self.wrote_leaf = true;

        let mut sentinel = [0u8; MAX_KEY_SIZE];
        {
            let leaf = LeafNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?;
            self.temp_key[..ks].copy_from_slice(leaf.min_key());
            sentinel[..ks].copy_from_slice(leaf.max_key());
        }
        // The tail separator must exceed every key ever written. Raising
        // the order floor to it keeps later separators sorted: a key equal
        // to the old maximum may not be re-inserted once flushed.
        successor_le(&mut sentinel[..ks]);
        self.last_key[..ks].copy_from_slice(&sentinel[..ks]);

        let stop = self.update_index(&sentinel[..ks], leaf_id)?;

        // Stamp the stale tails above the insertion level, child first,
        // root last.
        for l in (0..stop).rev() {
            self.pool.read_into(self.path.get(l), WRITE_FRAME)?;
            self.pool.mark_modified(WRITE_FRAME, l as u8);
            let count = InteriorNode::new(self.pool.frame(WRITE_FRAME), &self.cfg)?.count();
            let tail = self.path.get(l + 1);
            {
                let mut node = InteriorNodeMut::new(self.pool.frame_mut(WRITE_FRAME), &self.cfg)?;
                node.set_child(count, tail);
            }
            let new_id = self.pool.write(WRITE_FRAME)?;
            self.path.set(l, new_id);
        }

        self.pool.reset_frame(WRITE_FRAME);
        self.pool.sync()
    }

    /// Flushes and releases the storage adapter.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.pool.close()
    }

    /// Cursor over the records whose keys fall in `[min, max]`; either
    /// bound may be omitted. The tree is mutably borrowed for the life of
    /// the scan, so no insert can invalidate it.
    pub fn scan<'t>(
        &'t mut self,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
    ) -> Result<RangeScan<'t, S>> {
        RangeScan::init(self, min, max)
    }

    /// Renders the persisted tree, annotating tail pointers shadowed by
    /// the active path. Diagnostic only; the returned string is the one
    /// allocation this crate makes outside initialization.
    pub fn dump(&mut self) -> Result<String> {
        let mut out = String::new();
        self.dump_node(self.path.get(0), 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&mut self, phys: u32, level: usize, out: &mut String) -> Result<()> {
        use std::fmt::Write as _;

        let height = self.path.height();
        if level >= height {
            let frame = self.pool.read(phys, &mut self.path)?;
            let leaf = LeafNode::new(self.pool.frame(frame), &self.cfg)?;
            let _ = writeln!(
                out,
                "{:width$}leaf {{page {}, {} records}}",
                "",
                phys,
                leaf.count(),
                width = level * 2
            );
            return Ok(());
        }

        let mut idx = 0;
        loop {
            // Re-read each round: the recursion below may have evicted us.
            let frame = self.pool.read(phys, &mut self.path)?;
            let node = InteriorNode::new(self.pool.frame(frame), &self.cfg)?;
            let count = node.count();
            if idx == 0 {
                let kind = if node.is_root() { "root" } else { "interior" };
                let _ = writeln!(
                    out,
                    "{:width$}{} {{page {}, {} keys}}",
                    "",
                    kind,
                    phys,
                    count,
                    width = level * 2
                );
            }
            if idx > count {
                break;
            }
            let stored = node.child_at(idx);
            let child = self.path.resolve_child(level, phys, idx, count, stored);
            if child != stored {
                let _ = writeln!(
                    out,
                    "{:width$}[tail {} remapped to {}]",
                    "",
                    stored,
                    child,
                    width = level * 2 + 2
                );
            }
            if child == 0 {
                break;
            }
            self.dump_node(child, level + 1, out)?;
            idx += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn small_tree(store_pages: usize) -> SeqTree<MemStore> {
        // 64-byte pages: 7 records per leaf, 6 separators per interior node.
        let cfg = TreeConfig::new(4, 4).page_size(64).buffer_pages(4);
        SeqTree::open(cfg, MemStore::new(64, store_pages)).unwrap()
    }

    fn put_u32(tree: &mut SeqTree<MemStore>, key: u32) {
        tree.put(&key.to_le_bytes(), &(key ^ 0x5555_5555).to_le_bytes())
            .unwrap();
    }

    fn get_u32(tree: &mut SeqTree<MemStore>, key: u32) -> Option<u32> {
        let mut value = [0u8; 4];
        match tree.get(&key.to_le_bytes(), &mut value).unwrap() {
            true => Some(u32::from_le_bytes(value)),
            false => None,
        }
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let mut tree = small_tree(16);
        assert_eq!(get_u32(&mut tree, 0), None);
        assert_eq!(tree.levels(), 1);
    }

    #[test]
    fn buffered_records_become_visible_after_flush() {
        let mut tree = small_tree(16);
        put_u32(&mut tree, 10);
        assert_eq!(get_u32(&mut tree, 10), None);

        tree.flush().unwrap();
        assert_eq!(get_u32(&mut tree, 10), Some(10 ^ 0x5555_5555));
        assert_eq!(tree.levels(), 2);
    }

    #[test]
    fn rejects_out_of_order_keys_and_allows_duplicates() {
        let mut tree = small_tree(16);
        put_u32(&mut tree, 5);
        assert!(tree.put(&3u32.to_le_bytes(), &[0u8; 4]).is_err());
        // Equal keys are tolerated.
        put_u32(&mut tree, 5);
    }

    #[test]
    fn rejects_wrong_sized_records() {
        let mut tree = small_tree(16);
        assert!(tree.put(&[1u8; 3], &[0u8; 4]).is_err());
        assert!(tree.put(&[1u8; 4], &[0u8; 5]).is_err());
        let mut small = [0u8; 3];
        assert!(tree.get(&[1u8; 4], &mut small).is_err());
    }

    #[test]
    fn multi_level_growth_keeps_all_keys_reachable() {
        // 7 records per leaf, 6 separators per node: 300 records force the
        // root to split and the tree to reach three interior levels.
        let mut tree = small_tree(256);
        for key in 0..300u32 {
            put_u32(&mut tree, key);
        }
        tree.flush().unwrap();

        assert!(tree.path.height() >= 3);
        for key in 0..300u32 {
            assert_eq!(get_u32(&mut tree, key), Some(key ^ 0x5555_5555), "key {}", key);
        }
        assert_eq!(get_u32(&mut tree, 300), None);
    }

    #[test]
    fn physical_ids_reveal_write_order() {
        let mut tree = small_tree(64);
        for key in 0..50u32 {
            put_u32(&mut tree, key);
        }
        tree.flush().unwrap();

        // The root is the last page written.
        let last = tree.pool.next_write_id() - 1;
        assert_eq!(tree.path.root(), last);
    }

    #[test]
    fn write_failure_propagates_from_put() {
        // Capacity 2: the initial root takes page 0, the first leaf page 1,
        // and the interior rewrite fails.
        let mut tree = small_tree(2);
        let mut result = Ok(());
        for key in 0..20u32 {
            result = tree.put(&key.to_le_bytes(), &key.to_le_bytes());
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn dump_renders_tree() {
        let mut tree = small_tree(64);
        for key in 0..40u32 {
            put_u32(&mut tree, key);
        }
        tree.flush().unwrap();
        // Put more so the bottom node is rewritten and the root tail
        // goes stale again.
        for key in 40..48u32 {
            put_u32(&mut tree, key);
        }

        let dump = tree.dump().unwrap();
        assert!(dump.contains("root"));
        assert!(dump.contains("leaf"));
    }
}
