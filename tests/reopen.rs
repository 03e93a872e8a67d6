//! # Durability and Reopen Integration Tests
//!
//! After a flush the tree must be reconstructible from its backing file
//! alone: the last page is the root, every stored pointer is current, and
//! a reopened engine serves the same data.
//!
//! ## Test Coverage
//!
//! 1. Flush, reopen, full scan and point lookups (file-backed)
//! 2. Idempotent flush: a second flush writes no pages
//! 3. Reopen of a freshly created (empty) tree
//! 4. Ingestion resumes after reopen
//! 5. Multi-level trees survive reopen

use std::path::Path;

use seqtree::{FileStore, SeqTree, TreeConfig};
use tempfile::tempdir;

const PAGE_SIZE: usize = 512;

fn config() -> TreeConfig {
    TreeConfig::new(4, 12).page_size(PAGE_SIZE).buffer_pages(4)
}

fn create(path: &Path) -> SeqTree<FileStore> {
    let store = FileStore::create(path, PAGE_SIZE).unwrap();
    SeqTree::open(config(), store).unwrap()
}

fn reopen(path: &Path) -> SeqTree<FileStore> {
    let store = FileStore::open(path, PAGE_SIZE).unwrap();
    SeqTree::reopen(config(), store).unwrap()
}

fn value_for(key: u32) -> [u8; 12] {
    let mut value = [0u8; 12];
    value[..4].copy_from_slice(&key.to_le_bytes());
    value[4..8].copy_from_slice(&(key ^ 0xA5A5_A5A5).to_le_bytes());
    value
}

fn load(tree: &mut SeqTree<FileStore>, keys: impl Iterator<Item = u32>) {
    for key in keys {
        tree.put(&key.to_le_bytes(), &value_for(key)).unwrap();
    }
}

fn scan_keys(tree: &mut SeqTree<FileStore>) -> Vec<u32> {
    let mut scan = tree.scan(None, None).unwrap();
    let mut keys = Vec::new();
    while let Some((key, value)) = scan.next().unwrap() {
        let key = u32::from_le_bytes(key.try_into().unwrap());
        assert_eq!(value, value_for(key));
        keys.push(key);
    }
    keys
}

// ============================================================================
// Reopen round trips
// ============================================================================

#[test]
fn reopened_tree_serves_all_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    {
        let mut tree = create(&path);
        load(&mut tree, 0..500);
        tree.flush().unwrap();
    }

    let mut tree = reopen(&path);
    assert_eq!(scan_keys(&mut tree), (0..500).collect::<Vec<_>>());

    let mut value = [0u8; 12];
    assert!(tree.get(&250u32.to_le_bytes(), &mut value).unwrap());
    assert_eq!(value, value_for(250));
    assert!(!tree.get(&500u32.to_le_bytes(), &mut value).unwrap());
}

#[test]
fn multi_level_tree_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");
    let n = 31 * 62 + 100;

    {
        let mut tree = create(&path);
        load(&mut tree, 0..n);
        tree.flush().unwrap();
        assert_eq!(tree.levels(), 3);
    }

    let mut tree = reopen(&path);
    assert_eq!(tree.levels(), 3);
    assert_eq!(scan_keys(&mut tree).len(), n as usize);
}

#[test]
fn reopen_of_empty_tree() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    {
        let mut tree = create(&path);
        tree.flush().unwrap();
    }

    let mut tree = reopen(&path);
    assert_eq!(tree.levels(), 1);
    assert!(scan_keys(&mut tree).is_empty());
}

// ============================================================================
// Flush semantics
// ============================================================================

#[test]
fn second_flush_writes_no_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    let mut tree = create(&path);
    load(&mut tree, 0..100);
    tree.flush().unwrap();

    let pages = tree.pages_written();
    tree.flush().unwrap();
    tree.flush().unwrap();
    assert_eq!(tree.pages_written(), pages);

    // The double flush corrupted nothing.
    assert_eq!(scan_keys(&mut tree), (0..100).collect::<Vec<_>>());
}

#[test]
fn ingestion_resumes_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    {
        let mut tree = create(&path);
        load(&mut tree, 0..200);
        tree.flush().unwrap();
    }

    {
        let mut tree = reopen(&path);
        load(&mut tree, 200..400);
        tree.flush().unwrap();
    }

    let mut tree = reopen(&path);
    assert_eq!(scan_keys(&mut tree), (0..400).collect::<Vec<_>>());
}

#[test]
fn close_flushes_buffered_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    {
        let mut tree = create(&path);
        load(&mut tree, 0..10);
        tree.close().unwrap();
    }

    let mut tree = reopen(&path);
    assert_eq!(scan_keys(&mut tree), (0..10).collect::<Vec<_>>());
}
