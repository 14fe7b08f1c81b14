//! Stable, persistent [`PageId`] issuance with LIFO reuse of deallocated
//! ids, backed by a sidecar `.idx` file.

use crate::page::{PageId, NULL_PAGE};
use crate::printdbg;
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// `capacity` plus the `free` list, persisted as
/// `[capacity: u64][free_count: u64][free_ids: u64 * free_count]`.
#[derive(Debug)]
pub struct IndexAllocator {
    file: std::fs::File,
    capacity: PageId,
    free: Vec<PageId>,
}

impl IndexAllocator {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let existed = path.as_ref().exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if existed && file.metadata()?.len() >= 16 {
            file.seek(SeekFrom::Start(0))?;

            let mut cap_bytes = [0u8; 8];
            file.read_exact(&mut cap_bytes)?;
            let capacity = PageId::from_ne_bytes(cap_bytes);

            let mut count_bytes = [0u8; 8];
            file.read_exact(&mut count_bytes)?;
            let count = u64::from_ne_bytes(count_bytes) as usize;

            let mut free = Vec::with_capacity(count);
            let mut id_bytes = [0u8; 8];
            for _ in 0..count {
                file.read_exact(&mut id_bytes)?;
                free.push(PageId::from_ne_bytes(id_bytes));
            }

            printdbg!("opened index allocator: capacity {capacity}, {count} free ids");

            Ok(Self {
                file,
                capacity,
                free,
            })
        } else {
            let mut allocator = Self {
                file,
                capacity: NULL_PAGE,
                free: Vec::new(),
            };
            allocator.close()?;
            Ok(allocator)
        }
    }

    /// LIFO reuse of `free`; otherwise the next never-issued id. Id `0`
    /// is reserved and never returned.
    pub fn allocate(&mut self) -> PageId {
        if let Some(id) = self.free.pop() {
            printdbg!("reused page id {id} from free list");
            id
        } else {
            self.capacity += 1;
            printdbg!("allocated new page id {}", self.capacity);
            self.capacity
        }
    }

    /// double-free is not detected; the caller is responsible.
    pub fn deallocate(&mut self, id: PageId) {
        self.free.push(id);
    }

    pub fn capacity(&self) -> PageId {
        self.capacity
    }

    /// writes `capacity`, `|free|`, then the `free` sequence, and syncs.
    pub fn close(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.capacity.to_ne_bytes())?;
        self.file
            .write_all(&(self.free.len() as u64).to_ne_bytes())?;
        for id in &self.free {
            self.file.write_all(&id.to_ne_bytes())?;
        }
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for IndexAllocator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path() -> String {
        use uuid::Uuid;
        format!("/tmp/ixpool-test-{}.idx", Uuid::new_v4())
    }

    #[test]
    fn allocate_skips_zero_and_reuses_freed() -> Result<()> {
        let path = test_path();
        let mut alloc = IndexAllocator::open(&path)?;

        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);

        alloc.deallocate(2);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 4);

        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn persists_across_reopen() -> Result<()> {
        let path = test_path();
        {
            let mut alloc = IndexAllocator::open(&path)?;
            alloc.allocate();
            alloc.allocate();
            alloc.deallocate(1);
            alloc.close()?;
        }

        let mut reopened = IndexAllocator::open(&path)?;
        assert_eq!(reopened.capacity(), 2);
        assert_eq!(reopened.allocate(), 1);
        assert_eq!(reopened.allocate(), 3);

        std::fs::remove_file(path)?;
        Ok(())
    }
}
