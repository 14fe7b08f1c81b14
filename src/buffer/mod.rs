mod frame;
mod guard;
mod latch;
mod replacer;

pub use frame::FrameId;
pub use guard::{Reader, Writer};

use crate::error::Error;
use crate::page::{Page, PageId};
use crate::paged_file::PagedFile;
use crate::printdbg;
use crate::scheduler::TaskScheduler;
use anyhow::Result;
use frame::Frame;
use parking_lot::{Condvar, FairMutex};
use replacer::LruK;
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// the spec's "bounded timeout (e.g., 20ms)" for `replacer_cv`.
const POOL_OVERFLOW_TIMEOUT: Duration = Duration::from_millis(20);

struct FrameCell(UnsafeCell<Frame>);

// SAFETY: all access to a `FrameCell`'s non-byte bookkeeping (pin count,
// dirty/valid flags, page id) happens while `BufferPoolManager::inner`
// is held; access to page bytes happens only after acquiring the
// frame's own `Latch`, which is `Sync` by construction. No two threads
// ever race on the same field without one of those two locks.
unsafe impl Sync for FrameCell {}

impl FrameCell {
    fn new() -> Self {
        Self(UnsafeCell::new(Frame::new()))
    }
}

struct Inner {
    page_map: HashMap<PageId, FrameId>,
    free_frames: Vec<FrameId>,
}

/// bounded-memory cache of disk pages with pin/latch semantics and page
/// guards. Configuration: page size (fixed, see [`crate::page::PAGE_SIZE`]),
/// frame count, `k` for the replacer, worker-thread count.
pub struct BufferPoolManager {
    frames: Vec<FrameCell>,
    inner: FairMutex<Inner>,
    replacer_cv: Condvar,
    replacer: LruK,
    paged_file: Arc<PagedFile>,
    scheduler: Arc<TaskScheduler>,
}

impl BufferPoolManager {
    pub fn new(
        frame_count: usize,
        k: usize,
        paged_file: Arc<PagedFile>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        frames.resize_with(frame_count, FrameCell::new);

        Self {
            frames,
            inner: FairMutex::new(Inner {
                page_map: HashMap::new(),
                free_frames: (0..frame_count).collect(),
            }),
            replacer_cv: Condvar::new(),
            replacer: LruK::new(k),
            paged_file,
            scheduler,
        }
    }

    fn frame_ref(&self, frame_id: FrameId) -> &Frame {
        unsafe { &*self.frames[frame_id].0.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn frame_mut(&self, frame_id: FrameId) -> &mut Frame {
        unsafe { &mut *self.frames[frame_id].0.get() }
    }

    pub fn get_reader(&self, page_id: PageId) -> Result<Reader> {
        let frame_id = self.checkout(page_id)?;
        let latch = self.frame_ref(frame_id).latch().rguard();
        printdbg!("buffer: reader on page {page_id} (frame {frame_id})");
        Ok(Reader {
            pool: self,
            frame_id,
            page_id,
            latch: Some(latch),
        })
    }

    pub fn get_writer(&self, page_id: PageId) -> Result<Writer> {
        let frame_id = self.checkout(page_id)?;
        let latch = self.frame_ref(frame_id).latch().wguard();
        printdbg!("buffer: writer on page {page_id} (frame {frame_id})");
        Ok(Writer {
            pool: self,
            frame_id,
            page_id,
            latch: Some(latch),
        })
    }

    /// allocate a fresh [`PageId`] and return a writer over its (zeroed)
    /// contents.
    pub fn new_page(&self) -> Result<Writer> {
        let page_id = self.paged_file.alloc();
        printdbg!("buffer: new page {page_id}");
        self.get_writer(page_id)
    }

    /// the `get_reader`/`get_writer` protocol, steps 1-6: resolves
    /// `page_id` to a resident frame, pins it, and records a replacer
    /// access, all under `bp_latch`. Returns with `bp_latch` released.
    fn checkout(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.inner.lock();

        let frame_id = if let Some(&frame_id) = inner.page_map.get(&page_id) {
            frame_id
        } else if let Some(frame_id) = inner.free_frames.pop() {
            self.fill(frame_id, page_id)?;
            inner.page_map.insert(page_id, frame_id);
            frame_id
        } else {
            let mut waited = Duration::ZERO;
            while !self.replacer.can_evict() {
                if waited >= POOL_OVERFLOW_TIMEOUT {
                    anyhow::bail!(Error::PoolOverflow);
                }
                let remaining = POOL_OVERFLOW_TIMEOUT - waited;
                let start = std::time::Instant::now();
                self.replacer_cv.wait_for(&mut inner, remaining);
                waited += start.elapsed();
            }

            let victim = self
                .replacer
                .evict()
                .ok_or_else(|| anyhow::Error::new(Error::PoolOverflow))?;
            let victim_page_id = self.frame_ref(victim).page_id();

            printdbg!("buffer: evicting frame {victim} (page {victim_page_id})");
            if self.frame_ref(victim).is_dirty() {
                self.write_back(victim, victim_page_id)?;
            }

            inner.page_map.remove(&victim_page_id);
            self.frame_mut(victim).reset();
            self.fill(victim, page_id)?;
            inner.page_map.insert(page_id, victim);
            victim
        };

        self.pin_and_record(frame_id);
        Ok(frame_id)
    }

    fn pin_and_record(&self, frame_id: FrameId) {
        let frame = self.frame_mut(frame_id);
        let was_unpinned = frame.pin_count() == 0;
        frame.pin();
        if was_unpinned {
            self.replacer.pin(frame_id);
        }
        self.replacer.access(frame_id);
    }

    /// called by page guards on drop, under no locks. Reacquires
    /// `bp_latch`, decrements the pin count, and notifies
    /// `replacer_cv` if the frame became evictable.
    fn release(&self, frame_id: FrameId) {
        let inner = self.inner.lock();
        let frame = self.frame_mut(frame_id);
        frame.unpin();
        if frame.pin_count() == 0 {
            self.replacer.unpin(frame_id);
            drop(inner);
            self.replacer_cv.notify_one();
        }
    }

    fn fill(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let paged_file = self.paged_file.clone();
        let page = self
            .scheduler
            .submit(page_id, move || paged_file.read(page_id))?
            .wait()?;
        self.frame_mut(frame_id).install(page_id, page);
        Ok(())
    }

    fn write_back(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let page: Page = self.frame_ref(frame_id).page().clone();
        let paged_file = self.paged_file.clone();
        self.scheduler
            .submit(page_id, move || paged_file.write(page_id, &page))?
            .wait()?;
        self.frame_mut(frame_id).mark_clean();
        Ok(())
    }

    /// refuses (returns `false`) if the page is resident and pinned.
    pub fn dealloc(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_map.get(&page_id) {
            if self.frame_ref(frame_id).pin_count() > 0 {
                return false;
            }
            self.replacer.remove(frame_id);
            inner.page_map.remove(&page_id);
            self.frame_mut(frame_id).reset();
            inner.free_frames.push(frame_id);
        }
        self.paged_file.dealloc(page_id);
        true
    }

    /// passthrough to the paged file's header region; the tree uses
    /// this to persist its root [`PageId`] without going through the
    /// frame pool (the header is read/written once per open/close, not
    /// worth caching).
    pub fn read_meta(&self, out: &mut [u8]) -> Result<bool> {
        self.paged_file.read_meta(out)
    }

    pub fn write_meta(&self, bytes: &[u8]) -> Result<()> {
        self.paged_file.write_meta(bytes)
    }

    pub fn flush_all(&self) -> Result<()> {
        let _inner = self.inner.lock();
        for frame_id in 0..self.frames.len() {
            let (is_valid, is_dirty, page_id) = {
                let frame = self.frame_ref(frame_id);
                (frame.is_valid(), frame.is_dirty(), frame.page_id())
            };
            if is_valid && is_dirty {
                assert_eq!(
                    self.frame_ref(frame_id).pin_count(),
                    0,
                    "flush_all encountered a pinned dirty frame"
                );
                let _latch = self.frame_ref(frame_id).latch().wguard();
                self.write_back(frame_id, page_id)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        let frame_id = *inner.page_map.get(&page_id)?;
        Some(self.frame_ref(frame_id).pin_count())
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all() {
            printdbg!("buffer: flush_all failed on drop: {err}");
        }
    }
}

// SAFETY: `Inner` (the only field without an automatic `Sync`) is always
// accessed behind `FairMutex`; `FrameCell` asserts `Sync` above.
unsafe impl Sync for BufferPoolManager {}
