use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one worker. Only that worker writes them; readers
/// take relaxed snapshots at any time.
#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    jobs_executed: AtomicU64,
    jobs_failed: AtomicU64,
    steal_attempts: AtomicU64,
    steals: AtomicU64,
    parks: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn padded() -> CachePadded<Self> {
        CachePadded::new(Self::default())
    }

    fn bump(counter: &AtomicU64) {
        counter.store(counter.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
    }

    pub(crate) fn executed(&self, failed: bool) {
        Self::bump(&self.jobs_executed);
        if failed {
            Self::bump(&self.jobs_failed);
        }
    }

    pub(crate) fn steal_attempt(&self, success: bool) {
        Self::bump(&self.steal_attempts);
        if success {
            Self::bump(&self.steals);
        }
    }

    pub(crate) fn parked(&self) {
        Self::bump(&self.parks);
    }

    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
        }
    }
}

/// Counters of a single worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    /// Jobs run to completion, failed ones included.
    pub jobs_executed: u64,
    /// Jobs that returned an error or panicked.
    pub jobs_failed: u64,
    /// Victim deques probed.
    pub steal_attempts: u64,
    /// Probes that returned a job.
    pub steals: u64,
    /// Times the worker went to sleep.
    pub parks: u64,
}

/// Scheduler-wide counters, summed over workers and kept per worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames submitted.
    pub frames_submitted: u64,
    /// Sum over workers.
    pub total: WorkerSnapshot,
    /// Per worker, by index.
    pub workers: Vec<WorkerSnapshot>,
}

impl StatsSnapshot {
    pub(crate) fn collect(frames_submitted: u64, workers: &[CachePadded<WorkerStats>]) -> Self {
        let workers: Vec<WorkerSnapshot> = workers.iter().map(|w| w.snapshot()).collect();
        let total = workers.iter().fold(WorkerSnapshot::default(), |acc, w| WorkerSnapshot {
            jobs_executed: acc.jobs_executed + w.jobs_executed,
            jobs_failed: acc.jobs_failed + w.jobs_failed,
            steal_attempts: acc.steal_attempts + w.steal_attempts,
            steals: acc.steals + w.steals,
            parks: acc.parks + w.parks,
        });
        Self {
            frames_submitted,
            total,
            workers,
        }
    }
}
