//! # seqtree - Sequential Copy-on-Write B-Tree
//!
//! seqtree is an embedded, page-oriented, append-only index for fixed-size
//! key/value records, built for devices where RAM is measured in pages:
//! microcontrollers writing to SD cards or raw flash. This implementation
//! prioritizes:
//!
//! - **Bounded memory**: a handful of page frames plus a fixed active-path
//!   array; nothing is allocated after `open`
//! - **Append-only storage**: every page is written once; edits are
//!   copy-on-write, which suits flash wear characteristics
//! - **One write per leaf**: interior levels are maintained lazily along
//!   the active path instead of being rewritten on every record
//!
//! ## Quick Start
//!
//! ```ignore
//! use seqtree::{SeqTree, TreeConfig, FileStore};
//!
//! let cfg = TreeConfig::new(4, 12).page_size(512).buffer_pages(4);
//! let store = FileStore::create("./index.dat", 512)?;
//! let mut tree = SeqTree::open(cfg, store)?;
//!
//! for key in 0u32..1000 {
//!     tree.put(&key.to_le_bytes(), &[0u8; 12])?;
//! }
//! tree.flush()?;
//!
//! let mut value = [0u8; 12];
//! assert!(tree.get(&42u32.to_le_bytes(), &mut value)?);
//!
//! let mut scan = tree.scan(Some(&40u32.to_le_bytes()), Some(&50u32.to_le_bytes()))?;
//! while let Some((key, value)) = scan.next()? {
//!     // 11 records, in key order
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------+
//! |        SeqTree (tree engine)        |   put / get / flush / scan
//! +------------------+------------------+
//! |    RangeScan     |   active path    |   per-level cursors / remap
//! +------------------+------------------+
//! |       node codec (leaf/interior)    |   byte-exact page views
//! +-------------------------------------+
//! |      FramePool (buffer manager)     |   P fixed frames, CoW writes
//! +-------------------------------------+
//! |   PageStore (FileStore / MemStore)  |   page-granular device access
//! +-------------------------------------+
//! ```
//!
//! Records arrive in key order and accumulate in the write buffer (frame
//! 0). Each time it fills, the leaf is persisted and the interior levels
//! are updated copy-on-write along the *active path*, the in-memory list
//! of current page ids from the root down to the node above the open leaf.
//! Stored rightmost pointers go stale as children are rewritten; descents
//! remap them through the path, and `flush` stamps them back into the
//! pages so the tree can be reopened from its last page alone.
//!
//! ## Module Overview
//!
//! - [`config`]: tree parameters, page geometry, key comparators
//! - [`node`]: header codec and leaf/interior page views
//! - [`buffer`]: the fixed-pool frame manager
//! - [`storage`]: the page-store contract and the file/RAM adapters
//! - [`tree`]: the engine and the active path
//! - [`scan`]: ordered range cursor
//!
//! ## Limits
//!
//! Single writer, single thread. No deletes, no in-place updates, no
//! transactions. Out-of-order inserts are rejected. Crash recovery is
//! limited to the last flush: on-disk pages are immutable and a reopen
//! reconstructs everything from the final root page.

pub mod buffer;
pub mod config;
pub mod node;
pub mod scan;
pub mod storage;
pub mod tree;

pub use buffer::{FramePool, PoolStats};
pub use config::{compare_bytes, compare_unsigned_le, KeyCompare, TreeConfig};
pub use scan::RangeScan;
pub use storage::{FileStore, MemStore, PageStore};
pub use tree::{ActivePath, SeqTree};
