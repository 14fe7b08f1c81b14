use super::frame::FrameId;
use super::BufferPoolManager;
use crate::page::{Page, PageId};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

/// move-only, scope-bound handle to a shared view of a page's bytes.
/// Construction pins the frame and records a replacer access;
/// destruction releases the per-frame latch, then unpins.
pub struct Reader<'a> {
    pub(super) pool: &'a BufferPoolManager,
    pub(super) frame_id: FrameId,
    pub(super) page_id: PageId,
    pub(super) latch: Option<RwLockReadGuard<'a, ()>>,
}

impl<'a> Reader<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.pool.frame_ref(self.frame_id).page()
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        self.page().read_bytes(start, end)
    }
}

impl<'a> Drop for Reader<'a> {
    fn drop(&mut self) {
        self.latch.take();
        self.pool.release(self.frame_id);
    }
}

/// exclusive counterpart of [`Reader`]. Marks the frame dirty on the
/// first mutable access.
pub struct Writer<'a> {
    pub(super) pool: &'a BufferPoolManager,
    pub(super) frame_id: FrameId,
    pub(super) page_id: PageId,
    pub(super) latch: Option<RwLockWriteGuard<'a, ()>>,
}

impl<'a> Writer<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.pool.frame_ref(self.frame_id).page()
    }

    pub fn page_mut(&mut self) -> &mut Page {
        self.pool.frame_mut(self.frame_id).mark_dirty();
        self.pool.frame_mut(self.frame_id).page_mut()
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        self.page().read_bytes(start, end)
    }

    pub fn write_bytes(&mut self, start: usize, end: usize, bytes: &[u8]) {
        self.page_mut().write_bytes(start, end, bytes);
    }
}

impl<'a> Drop for Writer<'a> {
    fn drop(&mut self) {
        self.latch.take();
        self.pool.release(self.frame_id);
    }
}
