//! File-backed page store.
//!
//! One flat file, page `i` at byte offset `i * page_size`, accessed with
//! seek plus exact reads and writes so the adapter also works on targets
//! without positioned I/O. Durability is a single `fsync` in `sync`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use super::PageStore;

#[derive(Debug)]
pub struct FileStore {
    file: File,
    page_size: usize,
}

impl FileStore {
    /// Creates the backing file, truncating any previous contents.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to create store at {}", path.as_ref().display()))?;
        Ok(Self { file, page_size })
    }

    /// Opens an existing backing file.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to open store at {}", path.as_ref().display()))?;

        let len = file.metadata()?.len();
        ensure!(
            len % page_size as u64 == 0,
            "store length {} is not a multiple of the page size {}",
            len,
            page_size
        );
        Ok(Self { file, page_size })
    }

    fn seek_to(&mut self, page_id: u32) -> Result<()> {
        let offset = page_id as u64 * self.page_size as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek to page {}", page_id))?;
        Ok(())
    }
}

impl PageStore for FileStore {
    fn read_page(&mut self, page_id: u32, dst: &mut [u8]) -> Result<()> {
        ensure!(
            dst.len() == self.page_size,
            "read buffer size {} != page size {}",
            dst.len(),
            self.page_size
        );
        self.seek_to(page_id)?;
        self.file
            .read_exact(dst)
            .wrap_err_with(|| format!("failed to read page {}", page_id))
    }

    fn write_page(&mut self, page_id: u32, src: &[u8]) -> Result<()> {
        ensure!(
            src.len() == self.page_size,
            "write buffer size {} != page size {}",
            src.len(),
            self.page_size
        );
        self.seek_to(page_id)?;
        self.file
            .write_all(src)
            .wrap_err_with(|| format!("failed to write page {}", page_id))
    }

    fn page_count(&self) -> u32 {
        match self.file.metadata() {
            Ok(meta) => (meta.len() / self.page_size as u64) as u32,
            Err(_) => 0,
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all().wrap_err("fsync failed")
    }

    fn close(&mut self) -> Result<()> {
        self.sync()
    }
}
