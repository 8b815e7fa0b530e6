//! Completion counters.
//!
//! Two flavours share one idea, an atomic count that is decremented exactly
//! once per finished unit of work:
//!
//! - [`WaitCounter`] sits inside every job and counts its unfinished
//!   predecessors. The decrement that observes zero makes the job ready.
//! - [`Fence`] counts outstanding jobs of a scope (a sub-graph or a whole
//!   frame) and lets other threads block on it or poll it.

use crate::sync::{
    Arc, AtomicU32, AtomicUsize, Condvar, Mutex, Ordering, fence, notify_all, wait_while,
    wait_while_for,
};
use core::fmt;
use std::time::Duration;

/// Remaining-dependency counter of a single job.
///
/// Cache-line aligned: neighbouring jobs are decremented by different
/// workers at the same time.
#[must_use]
#[derive(Debug)]
#[repr(align(128))]
pub struct WaitCounter {
    /// Total number of predecessors.
    total: u32,
    /// Number of predecessors that haven't finished yet.
    left: AtomicU32,
}

impl WaitCounter {
    /// Counter waiting on `total` predecessors.
    pub fn new(total: u32) -> Self {
        Self {
            total,
            left: AtomicU32::new(total),
        }
    }

    /// Number of predecessors the counter was created with.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of predecessors still outstanding.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.left.load(Ordering::Acquire)
    }

    /// Record one finished predecessor.
    ///
    /// Returns `true` for exactly one caller: the one whose decrement
    /// released the counter. That caller observes every write the other
    /// predecessors made before their own decrement.
    ///
    /// # Panics
    /// If decremented more times than `total`.
    pub fn decrement(&self) -> bool {
        fence(Ordering::Release);
        let released = self.decrement_relaxed();
        if released {
            fence(Ordering::Acquire);
        }
        released
    }

    /// Relaxed decrement without fences.
    ///
    /// Callers batching several decrements issue one Release fence before
    /// the batch and one Acquire fence after it if anything was released.
    pub(crate) fn decrement_relaxed(&self) -> bool {
        let prev = self.left.fetch_sub(1, Ordering::Relaxed);
        assert_ne!(prev, 0, "WaitCounter decremented past zero");
        prev == 1
    }
}

/// Shared completion fence for a group of jobs.
///
/// Cloning is cheap and every clone observes the same count. Reaching zero
/// wakes every thread blocked in [`Fence::wait`] at once.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    remaining: AtomicUsize,
    lock: Mutex<()>,
    released: Condvar,
}

impl Fence {
    /// Fence expecting `count` completions. A zero count is already done.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                remaining: AtomicUsize::new(count),
                lock: Mutex::new(()),
                released: Condvar::new(),
            }),
        }
    }

    /// Record one completion.
    ///
    /// Returns `true` if this call brought the count to zero.
    ///
    /// # Panics
    /// If signalled more times than the fence's count.
    pub fn signal_one_complete(&self) -> bool {
        let prev = self.inner.remaining.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Fence signalled more times than its count");
        if prev == 1 {
            notify_all(&self.inner.lock, &self.inner.released);
            true
        } else {
            false
        }
    }

    /// Non-blocking poll.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.remaining.load(Ordering::Acquire) == 0
    }

    /// Completions still outstanding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Block the calling thread until the count reaches zero.
    ///
    /// Must not be called from inside a job: the waiting worker would stop
    /// draining its own deque.
    pub fn wait(&self) {
        if self.is_done() {
            return;
        }
        wait_while(&self.inner.lock, &self.inner.released, |_| !self.is_done());
    }

    /// Like [`Fence::wait`] but gives up after `timeout`.
    ///
    /// Returns whether the fence is done.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if !self.is_done() {
            wait_while_for(
                &self.inner.lock,
                &self.inner.released,
                |_| !self.is_done(),
                timeout,
            );
        }
        self.is_done()
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}
