use super::latch::Latch;
use crate::page::{Page, PageId, NULL_PAGE};

pub type FrameId = usize;

/// One in-memory slot. Lives for the pool's lifetime; its *occupant*
/// (which `page_id` it currently holds) turns over as pages are fetched
/// and evicted.
pub struct Frame {
    page_id: PageId,
    page: Page,
    is_valid: bool,
    is_dirty: bool,
    pin_count: u32,
    latch: Latch,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page_id: NULL_PAGE,
            page: Page::zeroed(),
            is_valid: false,
            is_dirty: false,
            pin_count: 0,
            latch: Latch::new(),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub(super) fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub(super) fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0, "unpin of frame with pin count 0");
        self.pin_count -= 1;
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// install a freshly-read page, resetting occupant bookkeeping.
    pub(super) fn install(&mut self, page_id: PageId, page: Page) {
        self.page_id = page_id;
        self.page = page;
        self.is_valid = true;
        self.is_dirty = false;
    }

    /// forget the current occupant so the frame can rejoin `free_frames`.
    pub(super) fn reset(&mut self) {
        self.page_id = NULL_PAGE;
        self.is_valid = false;
        self.is_dirty = false;
        debug_assert_eq!(self.pin_count, 0);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
