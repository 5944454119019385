//! One-shot completion handles.
//!
//! A [`Completion`] is either already satisfied or fed exactly once by a
//! worker thread. The cache manager hands these to evaluator threads; the
//! batch reader's `load_aggregations` is the only place that blocks on
//! them.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use starcache_error::{Result, StarCacheError};
use starcache_segment::SegmentWithData;

/// A segment load in flight: resolves to the hydrated segment or the load
/// error, shared by every waiter.
pub type SegmentFuture = Completion<Result<Arc<SegmentWithData>>>;

enum Slot<T> {
    Pending,
    Ready(T),
    Cancelled,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Completion-with-value handle with `get`/`cancel`.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.slot.lock() {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Cancelled => "cancelled",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

impl<T: Clone> Completion<T> {
    /// A pending completion.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Pending),
                cond: Condvar::new(),
            }),
        }
    }

    /// An already-satisfied completion.
    #[must_use]
    pub fn satisfied(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Ready(value)),
                cond: Condvar::new(),
            }),
        }
    }

    /// Complete with a value. Returns `false` if already completed or
    /// cancelled.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(value);
            drop(slot);
            self.inner.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Cancel. Waiters observe `Cancelled`. Returns `false` if already
    /// completed.
    pub fn cancel(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Cancelled;
            drop(slot);
            self.inner.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// The value, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        match &*self.inner.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether a value or a cancellation has landed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }

    /// Block until completed; `Cancelled` if the handle was cancelled.
    pub fn get(&self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Cancelled => return Err(StarCacheError::Cancelled),
                Slot::Pending => self.inner.cond.wait(&mut slot),
            }
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_satisfied_returns_immediately() {
        let done = Completion::satisfied(7_u32);
        assert!(done.is_done());
        assert_eq!(done.try_get(), Some(7));
        assert_eq!(done.get().expect("satisfied"), 7);
    }

    #[test]
    fn test_complete_wakes_blocked_getter() {
        let pending: Completion<u32> = Completion::new();
        let handle = {
            let pending = pending.clone();
            thread::spawn(move || pending.get())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(pending.complete(99));
        assert_eq!(handle.join().expect("join").expect("value"), 99);
    }

    #[test]
    fn test_double_complete_rejected() {
        let once: Completion<u32> = Completion::new();
        assert!(once.complete(1));
        assert!(!once.complete(2));
        assert_eq!(once.try_get(), Some(1));
    }

    #[test]
    fn test_cancel_propagates_to_getters() {
        let pending: Completion<u32> = Completion::new();
        assert!(pending.cancel());
        assert_eq!(pending.get(), Err(StarCacheError::Cancelled));
        assert!(!pending.complete(5), "cancelled handle stays cancelled");
    }
}
