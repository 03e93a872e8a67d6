//! In-memory page store with a fixed capacity.
//!
//! All slots are allocated up front; nothing grows afterwards, matching the
//! no-allocation-after-init discipline of the rest of the engine. Reads of
//! pages that were never written fail, as do writes past the capacity.
//! Both are useful injection points for exercising the storage failure
//! paths.

use eyre::{ensure, Result};

use super::PageStore;

#[derive(Debug)]
pub struct MemStore {
    pages: Box<[u8]>,
    written: Box<[bool]>,
    page_size: usize,
    high_water: u32,
}

impl MemStore {
    pub fn new(page_size: usize, capacity: usize) -> Self {
        Self {
            pages: vec![0u8; page_size * capacity].into_boxed_slice(),
            written: vec![false; capacity].into_boxed_slice(),
            page_size,
            high_water: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.written.len()
    }
}

impl PageStore for MemStore {
    fn read_page(&mut self, page_id: u32, dst: &mut [u8]) -> Result<()> {
        ensure!(
            dst.len() == self.page_size,
            "read buffer size {} != page size {}",
            dst.len(),
            self.page_size
        );
        let idx = page_id as usize;
        ensure!(
            idx < self.written.len() && self.written[idx],
            "read of unwritten page {}",
            page_id
        );
        let off = idx * self.page_size;
        dst.copy_from_slice(&self.pages[off..off + self.page_size]);
        Ok(())
    }

    fn write_page(&mut self, page_id: u32, src: &[u8]) -> Result<()> {
        ensure!(
            src.len() == self.page_size,
            "write buffer size {} != page size {}",
            src.len(),
            self.page_size
        );
        let idx = page_id as usize;
        ensure!(
            idx < self.written.len(),
            "write of page {} past capacity {}",
            page_id,
            self.written.len()
        );
        let off = idx * self.page_size;
        self.pages[off..off + self.page_size].copy_from_slice(src);
        self.written[idx] = true;
        self.high_water = self.high_water.max(page_id + 1);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.high_water
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
