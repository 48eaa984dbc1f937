//! Per-task resource accounting.
//!
//! Every logical task (a query, or one view inside a fan-out insert) owns a
//! [`ThreadAccounting`] context. Whichever OS thread runs work for that task
//! installs the context into a thread-local slot for the duration of the work,
//! so counters land on the right owner no matter how stages are scheduled.
//!
//! The slot is only ever mutated through [`AccountingScope`], which restores
//! the previous occupant on every exit path, including unwinds.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadAccounting>>> = const { RefCell::new(None) };
}

/// Counters for one logical task.
#[derive(Debug, Default)]
pub struct ThreadAccounting {
    query_id: Mutex<String>,
    rows_written: AtomicU64,
    bytes_written: AtomicU64,
    wall_time_nanos: AtomicU64,
}

impl ThreadAccounting {
    /// Create a fresh accounting context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate this context with the query that owns it.
    pub fn attach_query(self: &Arc<Self>, query_id: &str) {
        *self.query_id.lock() = query_id.to_string();
    }

    /// The owning query id.
    pub fn query_id(&self) -> String {
        self.query_id.lock().clone()
    }

    /// Record written output attributed to this task.
    pub fn add_written(&self, rows: u64, bytes: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Rows written on behalf of this task.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Bytes written on behalf of this task.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Wall time spent inside scopes of this task.
    pub fn wall_time_nanos(&self) -> u64 {
        self.wall_time_nanos.load(Ordering::Relaxed)
    }

    fn add_wall_time(&self, nanos: u64) {
        self.wall_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

/// The accounting context currently installed on this thread, if any.
pub fn current() -> Option<Arc<ThreadAccounting>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Record written output against the currently installed context.
pub fn add_written(rows: u64, bytes: u64) {
    if let Some(accounting) = current() {
        accounting.add_written(rows, bytes);
    }
}

pub(crate) fn set_current(value: Option<Arc<ThreadAccounting>>) {
    CURRENT.with(|slot| *slot.borrow_mut() = value);
}

/// Scoped installation of an accounting context into the thread slot.
///
/// On drop, performance counters are folded into the installed context and
/// the slot is restored to whatever occupied it at entry. Dropping happens
/// on unwind too, so a panicking stage cannot leak the slot.
#[must_use]
pub struct AccountingScope {
    previous: Option<Arc<ThreadAccounting>>,
    active: Arc<ThreadAccounting>,
    started: Instant,
}

impl AccountingScope {
    /// Snapshot the slot, install `active`, and reset its usage marker.
    pub fn enter(active: Arc<ThreadAccounting>) -> Self {
        let previous = current();
        set_current(Some(active.clone()));
        Self {
            previous,
            active,
            started: Instant::now(),
        }
    }
}

impl Drop for AccountingScope {
    fn drop(&mut self) {
        self.active
            .add_wall_time(self.started.elapsed().as_nanos() as u64);
        set_current(self.previous.take());
    }
}
