use parking_lot::{
    lock_api::RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// short-duration mutex protecting one frame's page bytes, distinct from
/// a logical database lock.
#[derive(Debug, Default)]
pub struct Latch {
    lock: RwLock<()>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(()),
        }
    }

    pub fn rguard(&self) -> RwLockReadGuard<()> {
        self.lock.read()
    }

    pub fn wguard(&self) -> RwLockWriteGuard<()> {
        self.lock.write()
    }

    #[allow(unused)]
    pub fn runlock(&self) {
        unsafe { self.lock.raw().unlock_shared() };
    }

    #[allow(unused)]
    pub fn wunlock(&self) {
        unsafe { self.lock.raw().unlock_exclusive() };
    }

    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}
