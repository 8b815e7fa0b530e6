//! Debug instrumentation for the read/write contract.
//!
//! Hazard edges serialize conflicting jobs within a frame and the frame gate
//! serializes conflicting frames, so two jobs holding conflicting accesses
//! at the same moment point at a scheduler bug. The tracker records live
//! holders per resource while jobs run and reports such overlaps.

use crate::{
    error::{AccessKind, AccessViolation},
    types::{HashMap, JobId, ResourceId},
};
use parking_lot::Mutex;
use smallvec::SmallVec;

/// A running job, qualified by its frame: job ids restart at zero in every
/// graph, and frames without conflicts run side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Holder {
    pub(crate) frame: u64,
    pub(crate) job: JobId,
}

#[derive(Debug, Default)]
struct Holders {
    writer: Option<Holder>,
    readers: SmallVec<[Holder; 4]>,
}

impl Holders {
    fn is_empty(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Live resource holders of every running job.
#[derive(Debug, Default)]
pub(crate) struct AccessTracker {
    live: Mutex<HashMap<ResourceId, Holders>>,
}

impl AccessTracker {
    /// Register `job`'s declared accesses and report conflicts with jobs
    /// already running. Accesses are registered even when they conflict so
    /// that `release` stays symmetric.
    pub(crate) fn acquire(
        &self,
        job: Holder,
        reads: &[ResourceId],
        writes: &[ResourceId],
    ) -> Vec<AccessViolation> {
        let overlap = |holder: Holder, resource, kind| AccessViolation::Overlap {
            job: job.job,
            holder: holder.job,
            holder_frame: holder.frame,
            resource,
            kind,
        };
        let mut violations = Vec::new();
        let mut live = self.live.lock();
        for &resource in writes {
            let holders = live.entry(resource).or_default();
            if let Some(holder) = holders.writer.or_else(|| holders.readers.first().copied()) {
                violations.push(overlap(holder, resource, AccessKind::Write));
            }
            holders.writer = Some(job);
        }
        for &resource in reads.iter().filter(|r| !writes.contains(*r)) {
            let holders = live.entry(resource).or_default();
            if let Some(holder) = holders.writer {
                violations.push(overlap(holder, resource, AccessKind::Read));
            }
            holders.readers.push(job);
        }
        violations
    }

    /// Drop `job`'s registrations. A writer registered later by another
    /// job stays in place.
    pub(crate) fn release(&self, job: Holder, reads: &[ResourceId], writes: &[ResourceId]) {
        let mut live = self.live.lock();
        for resource in reads.iter().chain(writes) {
            let Some(holders) = live.get_mut(resource) else {
                continue;
            };
            if holders.writer == Some(job) {
                holders.writer = None;
            }
            if let Some(pos) = holders.readers.iter().position(|&r| r == job) {
                holders.readers.swap_remove(pos);
            }
            if holders.is_empty() {
                live.remove(resource);
            }
        }
    }

    #[cfg(test)]
    fn live_resources(&self) -> usize {
        self.live.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(i: usize) -> Holder {
        Holder {
            frame: 0,
            job: JobId::from_index(i),
        }
    }

    const A: ResourceId = ResourceId::new(1);
    const B: ResourceId = ResourceId::new(2);

    #[test]
    fn shared_readers_do_not_conflict() {
        let tracker = AccessTracker::default();
        assert!(tracker.acquire(job(0), &[A], &[]).is_empty());
        assert!(tracker.acquire(job(1), &[A], &[]).is_empty());
        tracker.release(job(0), &[A], &[]);
        tracker.release(job(1), &[A], &[]);
        assert_eq!(tracker.live_resources(), 0);
    }

    #[test]
    fn writer_overlapping_reader_is_reported() {
        let tracker = AccessTracker::default();
        assert!(tracker.acquire(job(0), &[A], &[]).is_empty());
        let violations = tracker.acquire(job(1), &[], &[A]);
        assert_eq!(
            violations,
            vec![AccessViolation::Overlap {
                job: JobId::from_index(1),
                holder: JobId::from_index(0),
                holder_frame: 0,
                resource: A,
                kind: AccessKind::Write,
            }]
        );
    }

    #[test]
    fn read_write_of_same_resource_counts_as_write() {
        let tracker = AccessTracker::default();
        assert!(tracker.acquire(job(0), &[A, B], &[A]).is_empty());
        let violations = tracker.acquire(job(1), &[B], &[]);
        assert!(violations.is_empty());
        let violations = tracker.acquire(job(2), &[A], &[]);
        assert_eq!(violations.len(), 1);
        tracker.release(job(0), &[A, B], &[A]);
        tracker.release(job(1), &[B], &[]);
        tracker.release(job(2), &[A], &[]);
        assert_eq!(tracker.live_resources(), 0);
    }

    #[test]
    fn same_job_id_in_two_frames_is_two_holders() {
        let tracker = AccessTracker::default();
        let first = job(0);
        let second = Holder { frame: 1, ..first };
        assert!(tracker.acquire(first, &[], &[A]).is_empty());
        let violations = tracker.acquire(second, &[], &[A]);
        assert_eq!(
            violations,
            vec![AccessViolation::Overlap {
                job: JobId::from_index(0),
                holder: JobId::from_index(0),
                holder_frame: 0,
                resource: A,
                kind: AccessKind::Write,
            }]
        );
        // Releasing the first frame's job leaves the second frame's writer.
        tracker.release(first, &[], &[A]);
        assert_eq!(tracker.live_resources(), 1);
        assert_eq!(tracker.acquire(job(3), &[A], &[]).len(), 1);
        tracker.release(second, &[], &[A]);
        tracker.release(job(3), &[A], &[]);
        assert_eq!(tracker.live_resources(), 0);
    }
}
