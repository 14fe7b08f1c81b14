//! Typed fixed-record on-disk storage keyed by [`PageId`]: a single
//! contiguous file laid out as `H + id * P` bytes, plus a sidecar
//! `.idx` allocator file.

use crate::alloc::IndexAllocator;
use crate::error::Error;
use crate::page::{Page, PageId, NULL_PAGE, PAGE_SIZE};
use crate::printdbg;
use anyhow::Result;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

struct Inner {
    file: std::fs::File,
    len: u64,
}

/// `H`: size in bytes of the header region reserved for caller metadata
/// (e.g. the tree's root page id). `0` means "no header".
pub struct PagedFile {
    header_size: u64,
    inner: Mutex<Inner>,
    allocator: Mutex<IndexAllocator>,
}

fn offset(header_size: u64, id: PageId) -> u64 {
    header_size + id * PAGE_SIZE as u64
}

impl PagedFile {
    pub fn open(path: impl AsRef<Path>, header_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let idx_path: PathBuf = {
            let mut p = path.to_path_buf();
            let mut name = p.file_name().unwrap().to_os_string();
            name.push(".idx");
            p.set_file_name(name);
            p
        };
        let allocator = IndexAllocator::open(idx_path)?;

        Ok(Self {
            header_size: header_size as u64,
            inner: Mutex::new(Inner { file, len }),
            allocator: Mutex::new(allocator),
        })
    }

    pub fn alloc(&self) -> PageId {
        self.allocator.lock().allocate()
    }

    pub fn dealloc(&self, id: PageId) {
        self.allocator.lock().deallocate(id);
    }

    /// grows (zero-filling) to `max(2*(H + id*P), H + id*P + P)` before
    /// any read/write that would otherwise run past the current length,
    /// so a freshly allocated page reads back as zeroed bytes.
    fn ensure_capacity(inner: &mut Inner, header_size: u64, id: PageId) -> Result<()> {
        let need = offset(header_size, id) + PAGE_SIZE as u64;
        if inner.len >= need {
            return Ok(());
        }
        let new_len = std::cmp::max(2 * offset(header_size, id), need);
        inner.file.set_len(new_len)?;
        inner.len = new_len;
        Ok(())
    }

    pub fn read(&self, id: PageId) -> Result<Page> {
        if id == NULL_PAGE {
            anyhow::bail!(Error::SegmentationFault);
        }
        let mut inner = self.inner.lock();
        Self::ensure_capacity(&mut inner, self.header_size, id)?;

        let mut buf = [0u8; PAGE_SIZE];
        inner.file.seek(SeekFrom::Start(offset(self.header_size, id)))?;
        inner.file.read_exact(&mut buf)?;
        printdbg!("paged_file: read page {id}");
        Ok(Page::from_bytes(&buf))
    }

    pub fn write(&self, id: PageId, page: &Page) -> Result<()> {
        if id == NULL_PAGE {
            anyhow::bail!(Error::SegmentationFault);
        }
        let mut inner = self.inner.lock();
        Self::ensure_capacity(&mut inner, self.header_size, id)?;

        inner.file.seek(SeekFrom::Start(offset(self.header_size, id)))?;
        inner.file.write_all(page.as_bytes())?;
        printdbg!("paged_file: wrote page {id}");
        Ok(())
    }

    /// returns `false` iff the file was newly created (header region was
    /// padded zero).
    pub fn read_meta(&self, out: &mut [u8]) -> Result<bool> {
        assert!(out.len() as u64 <= self.header_size);
        let mut inner = self.inner.lock();
        if inner.len < self.header_size {
            inner.file.set_len(self.header_size)?;
            inner.len = self.header_size;
            return Ok(false);
        }
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.read_exact(out)?;
        Ok(true)
    }

    pub fn write_meta(&self, bytes: &[u8]) -> Result<()> {
        assert!(bytes.len() as u64 <= self.header_size);
        let mut inner = self.inner.lock();
        if inner.len < self.header_size {
            inner.file.set_len(self.header_size)?;
            inner.len = self.header_size;
        }
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(bytes)?;
        inner.file.flush()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
