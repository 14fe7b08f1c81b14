//! Serializes work per `PageId` while exploiting parallelism across
//! distinct pages: `G` fixed groups keyed by `id mod G`, each a FIFO
//! queue drained by a round-robin pool of worker threads.

use crate::error::Error;
use crate::printdbg;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const GROUP_COUNT: usize = 16;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Group {
    queue: Mutex<VecDeque<Job>>,
    cv: Condvar,
    /// claimed by the worker currently draining this group, so two
    /// workers never pop from (and thus reorder) the same FIFO.
    busy: AtomicBool,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            busy: AtomicBool::new(false),
        }
    }
}

struct Shared {
    groups: Vec<Group>,
    stopped: AtomicBool,
}

/// a one-shot handle to a submitted closure's eventual result.
pub struct Promise<T> {
    rx: std::sync::mpsc::Receiver<T>,
}

impl<T> Promise<T> {
    /// blocks until the closure has run and produced its value.
    pub fn wait(self) -> T {
        self.rx.recv().expect("worker dropped without sending result")
    }
}

pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl TaskScheduler {
    pub fn new(worker_threads: usize) -> Self {
        let mut groups = Vec::with_capacity(GROUP_COUNT);
        groups.resize_with(GROUP_COUNT, Group::default);

        let shared = Arc::new(Shared {
            groups,
            stopped: AtomicBool::new(false),
        });

        let workers = (0..worker_threads.max(1))
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || Self::work(shared, i))
            })
            .collect();

        Self { shared, workers }
    }

    fn work(shared: Arc<Shared>, start: usize) {
        let mut cursor = start;
        loop {
            if shared.stopped.load(Ordering::SeqCst) && Self::all_empty(&shared) {
                return;
            }

            let idx = cursor % shared.groups.len();
            cursor = cursor.wrapping_add(1);
            let group = &shared.groups[idx];

            if group
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // another worker already owns this group's FIFO; move on
                // rather than contending for it.
                continue;
            }
            Self::drain_group(&shared, group);
            group.busy.store(false, Ordering::SeqCst);
        }
    }

    /// runs every job currently (or soon) queued for `group`, one at a
    /// time, while holding exclusive claim on it: this is what makes
    /// closures submitted for the same id execute in submission order.
    /// Returns once the queue has been empty for one poll timeout.
    fn drain_group(shared: &Shared, group: &Group) {
        loop {
            let job = {
                let mut queue = group.queue.lock().unwrap();
                if queue.is_empty() {
                    if shared.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    let (guard, timeout) =
                        group.cv.wait_timeout(queue, POLL_TIMEOUT).unwrap();
                    queue = guard;
                    if timeout.timed_out() && queue.is_empty() {
                        return;
                    }
                }
                queue.pop_front()
            };

            match job {
                Some(job) => job(),
                None => return,
            }
        }
    }

    fn all_empty(shared: &Shared) -> bool {
        shared
            .groups
            .iter()
            .all(|g| g.queue.lock().unwrap().is_empty())
    }

    /// `id mod G` picks the group; closures submitted for the same id
    /// execute in submission order.
    pub fn submit<F, T>(&self, id: u64, f: F) -> Result<Promise<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.stopped.load(Ordering::SeqCst) {
            anyhow::bail!(Error::InvalidPool);
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let job: Job = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });

        let idx = (id as usize) % self.shared.groups.len();
        let group = &self.shared.groups[idx];
        {
            let mut queue = group.queue.lock().unwrap();
            queue.push_back(job);
        }
        group.cv.notify_one();

        printdbg!("scheduler: submitted task for id {id} to group {idx}");
        Ok(Promise { rx })
    }

    /// no new submissions accepted after this; pending closures still
    /// complete before workers exit.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for group in &self.shared.groups {
            group.cv.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as AU;

    #[test]
    fn fifo_per_id_scenario() {
        let scheduler = TaskScheduler::new(4);
        let observed = Arc::new(Mutex::new(Vec::new()));

        let promises: Vec<_> = (0..1000u64)
            .map(|i| {
                let observed = observed.clone();
                scheduler
                    .submit(42, move || {
                        observed.lock().unwrap().push(i);
                    })
                    .unwrap()
            })
            .collect();

        for p in promises {
            p.wait();
        }

        let observed = observed.lock().unwrap();
        let expected: Vec<u64> = (0..1000).collect();
        assert_eq!(*observed, expected);
    }

    #[test]
    fn distinct_ids_run_in_parallel() {
        let scheduler = TaskScheduler::new(4);
        let counter = Arc::new(AU::new(0));

        let promises: Vec<_> = (0..64u64)
            .map(|i| {
                let counter = counter.clone();
                scheduler
                    .submit(i, move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        i
                    })
                    .unwrap()
            })
            .collect();

        let mut results: Vec<u64> = promises.into_iter().map(|p| p.wait()).collect();
        results.sort();
        assert_eq!(results, (0..64).collect::<Vec<_>>());
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn stop_rejects_new_submissions() {
        let mut scheduler = TaskScheduler::new(2);
        scheduler.submit(1, || 1).unwrap().wait();
        scheduler.stop();
        assert!(scheduler.submit(1, || 1).is_err());
    }
}
