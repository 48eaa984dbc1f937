//! Worker pool for running per-view stages concurrently.
//!
//! Scoped threads claim work items through an atomic index, so borrowed
//! items (each view record is mutated by exactly one worker) can be handed
//! out without `'static` bounds, and the caller blocks until all scheduled
//! work is drained.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Thread pool of a fixed size.
pub struct WorkerPool {
    num_workers: usize,
}

impl WorkerPool {
    /// Create a new worker pool with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    /// Get the number of workers.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `work` over every item, returning once all items finished.
    ///
    /// With a single worker (or a single item) everything runs on the
    /// calling thread. Item completion order is unspecified.
    pub fn run_all<T, F>(&self, items: Vec<T>, work: F)
    where
        T: Send,
        F: Fn(T) + Send + Sync,
    {
        if items.is_empty() {
            return;
        }

        let num_items = items.len();
        if self.num_workers == 1 || num_items == 1 {
            for item in items {
                work(item);
            }
            return;
        }

        let slots: Vec<Mutex<Option<T>>> = items.into_iter().map(|t| Mutex::new(Some(t))).collect();
        let next_index = AtomicUsize::new(0);
        let work = &work;
        let slots = &slots;
        let next_index = &next_index;

        thread::scope(|scope| {
            let num_threads = self.num_workers.min(num_items);
            for _ in 0..num_threads {
                scope.spawn(move || loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= num_items {
                        break;
                    }
                    let item = slots[index].lock().unwrap().take();
                    if let Some(item) = item {
                        work(item);
                    }
                });
            }
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
    }
}
