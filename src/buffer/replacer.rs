//! LRU-K victim selection, partitioned into an "obscure" set (frames
//! seen fewer than `K` times) and a "hotspot" set (seen at least `K`
//! times), each guarded by its own mutex.

use super::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot {
    history: Vec<u64>,
    access_count: u64,
    evictable: bool,
}

impl Slot {
    fn new(k: usize) -> Self {
        Self {
            history: vec![0; k],
            access_count: 0,
            evictable: false,
        }
    }

    fn record(&mut self, k: usize, timestamp: u64) {
        self.history[(self.access_count % k as u64) as usize] = timestamp;
        self.access_count += 1;
    }

    fn heated(&self, k: usize) -> bool {
        self.access_count >= k as u64
    }

    /// backward k-distance: the first access for an obscure entry, the
    /// k-th-most-recent access for a hotspot entry.
    fn k_dist(&self, k: usize) -> u64 {
        if self.heated(k) {
            self.history[(self.access_count % k as u64) as usize]
        } else {
            self.history[0]
        }
    }
}

#[derive(Default)]
struct Partition {
    slots: HashMap<FrameId, Slot>,
}

impl Partition {
    fn victim(&self, k: usize) -> Option<FrameId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.evictable)
            .min_by_key(|(_, slot)| slot.k_dist(k))
            .map(|(id, _)| *id)
    }
}

pub struct LruK {
    k: usize,
    timestamp: AtomicU64,
    obscure: Mutex<Partition>,
    hotspot: Mutex<Partition>,
    evictable_count: AtomicU64,
}

impl LruK {
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            timestamp: AtomicU64::new(0),
            obscure: Mutex::new(Partition::default()),
            hotspot: Mutex::new(Partition::default()),
            evictable_count: AtomicU64::new(0),
        }
    }

    pub fn evictable_count(&self) -> u64 {
        self.evictable_count.load(Ordering::SeqCst)
    }

    pub fn can_evict(&self) -> bool {
        self.evictable_count() > 0
    }

    /// record a new access. On an unknown id, creates a new obscure
    /// entry (not evictable; the buffer manager `pin`s immediately
    /// after). Promotes obscure -> hotspot on the k-th access.
    pub fn access(&self, frame_id: FrameId) {
        let ts = self.timestamp.fetch_add(1, Ordering::SeqCst);

        let mut obscure = self.obscure.lock();
        if let Some(slot) = obscure.slots.get_mut(&frame_id) {
            slot.record(self.k, ts);
            if slot.heated(self.k) {
                let slot = obscure.slots.remove(&frame_id).unwrap();
                drop(obscure);
                self.hotspot.lock().slots.insert(frame_id, slot);
            }
            return;
        }
        drop(obscure);

        let mut hotspot = self.hotspot.lock();
        if let Some(slot) = hotspot.slots.get_mut(&frame_id) {
            slot.record(self.k, ts);
            return;
        }
        drop(hotspot);

        let mut slot = Slot::new(self.k);
        slot.record(self.k, ts);
        self.obscure.lock().slots.insert(frame_id, slot);
    }

    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut obscure = self.obscure.lock();
        if let Some(slot) = obscure.slots.get_mut(&frame_id) {
            if slot.evictable != evictable {
                slot.evictable = evictable;
                self.bump_count(evictable);
            }
            return;
        }
        drop(obscure);

        let mut hotspot = self.hotspot.lock();
        if let Some(slot) = hotspot.slots.get_mut(&frame_id) {
            if slot.evictable != evictable {
                slot.evictable = evictable;
                self.bump_count(evictable);
            }
        }
    }

    pub fn pin(&self, frame_id: FrameId) {
        self.set_evictable(frame_id, false);
    }

    pub fn unpin(&self, frame_id: FrameId) {
        self.set_evictable(frame_id, true);
    }

    fn bump_count(&self, evictable: bool) {
        if evictable {
            self.evictable_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.evictable_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// obscure set first, then hotspot; `None` if neither has an
    /// evictable candidate.
    pub fn evict(&self) -> Option<FrameId> {
        let mut obscure = self.obscure.lock();
        if let Some(id) = obscure.victim(self.k) {
            obscure.slots.remove(&id);
            drop(obscure);
            self.evictable_count.fetch_sub(1, Ordering::SeqCst);
            return Some(id);
        }
        drop(obscure);

        let mut hotspot = self.hotspot.lock();
        if let Some(id) = hotspot.victim(self.k) {
            hotspot.slots.remove(&id);
            drop(hotspot);
            self.evictable_count.fetch_sub(1, Ordering::SeqCst);
            return Some(id);
        }

        None
    }

    /// forcefully drop tracking for `frame_id`. Fails (`false`) if the
    /// id is untracked or not evictable.
    pub fn remove(&self, frame_id: FrameId) -> bool {
        let mut obscure = self.obscure.lock();
        if let Some(slot) = obscure.slots.get(&frame_id) {
            if !slot.evictable {
                return false;
            }
            obscure.slots.remove(&frame_id);
            drop(obscure);
            self.evictable_count.fetch_sub(1, Ordering::SeqCst);
            return true;
        }
        drop(obscure);

        let mut hotspot = self.hotspot.lock();
        if let Some(slot) = hotspot.slots.get(&frame_id) {
            if !slot.evictable {
                return false;
            }
            hotspot.slots.remove(&frame_id);
            drop(hotspot);
            self.evictable_count.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        false
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<FrameId> {
        let obscure = self.obscure.lock();
        if let Some(id) = obscure.victim(self.k) {
            return Some(id);
        }
        drop(obscure);
        self.hotspot.lock().victim(self.k)
    }
}
