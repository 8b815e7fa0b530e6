//! Frame lifetime: the shared run state workers update, the fence handed to
//! the submitter, and the gate that keeps the next frame from writing what
//! the previous one still touches.

use crate::{
    error::{FrameError, JobError},
    fence::Fence,
    graph::ExecutableGraph,
    types::{HashSet, ResourceId},
};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

/// State of one submitted frame, shared by every worker touching it.
#[derive(Debug)]
pub(crate) struct FrameRun {
    pub(crate) index: u64,
    pub(crate) graph: ExecutableGraph,
    pub(crate) fence: Fence,
    budget: Option<Duration>,
    errors: Mutex<Vec<JobError>>,
    executed: AtomicUsize,
    started: Instant,
    /// Time from submission to the latest completion seen so far.
    elapsed_nanos: AtomicU64,
}

impl FrameRun {
    pub(crate) fn new(index: u64, graph: ExecutableGraph, budget: Option<Duration>) -> Self {
        Self {
            index,
            fence: Fence::new(graph.len()),
            graph,
            budget,
            errors: Mutex::new(Vec::new()),
            executed: AtomicUsize::new(0),
            started: Instant::now(),
            elapsed_nanos: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_error(&self, error: JobError) {
        self.errors.lock().push(error);
    }

    /// Account one finished job. Must happen before the job signals the
    /// frame fence so waiters see it.
    pub(crate) fn record_completion(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed))
    }

    pub(crate) fn over_budget(&self) -> bool {
        self.budget.is_some_and(|budget| self.elapsed() > budget)
    }

    /// Drain the run into a report. Only meaningful once the fence is done.
    fn report(&self) -> FrameReport {
        debug_assert!(self.fence.is_done(), "FrameRun::report: frame still running");
        FrameReport {
            frame: self.index,
            jobs: self.graph.len(),
            executed: self.executed.load(Ordering::Relaxed),
            errors: std::mem::take(&mut *self.errors.lock()),
            elapsed: self.elapsed(),
            over_budget: self.over_budget(),
        }
    }

    /// Whether this frame holds a hazard against a graph with the given
    /// access sets.
    fn conflicts_with(&self, reads: &HashSet<ResourceId>, writes: &HashSet<ResourceId>) -> bool {
        let ours = &self.graph.access;
        ours.writes.iter().any(|r| reads.contains(r) || writes.contains(r))
            || ours.reads.iter().any(|r| writes.contains(r))
    }
}

/// Registry of frames that were submitted but have not reached fence-zero.
///
/// `finalize` on a bound builder waits here early; `submit` is where the
/// gate is enforced, for bound and unbound graphs alike.
#[derive(Debug, Default)]
pub(crate) struct FrameGate {
    in_flight: Mutex<Vec<Arc<FrameRun>>>,
}

impl FrameGate {
    /// Register `run` as in flight once no running frame conflicts with it.
    ///
    /// The conflict check and the registration happen under one lock, so
    /// two graphs finalized back to back still run one after the other.
    pub(crate) fn admit(&self, run: &Arc<FrameRun>) {
        let access = &run.graph.access;
        loop {
            let blocking = {
                let mut in_flight = self.in_flight.lock();
                let blocking = Self::conflicting(&in_flight, &access.reads, &access.writes);
                if blocking.is_empty() {
                    in_flight.push(Arc::clone(run));
                    return;
                }
                blocking
            };
            for (frame, fence) in blocking {
                tracing::debug!(
                    frame,
                    next = run.index,
                    "waiting for conflicting frame before submit"
                );
                fence.wait();
            }
        }
    }

    pub(crate) fn retire(&self, frame: u64) {
        self.in_flight.lock().retain(|run| run.index != frame);
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.lock().iter().filter(|run| !run.fence.is_done()).count()
    }

    /// Block until no in-flight frame conflicts with the given access sets.
    pub(crate) fn wait_for_hazards(
        &self,
        reads: &HashSet<ResourceId>,
        writes: &HashSet<ResourceId>,
    ) {
        let blocking = Self::conflicting(&self.in_flight.lock(), reads, writes);
        for (frame, fence) in blocking {
            tracing::debug!(frame, "waiting for conflicting frame before finalize");
            fence.wait();
        }
    }

    fn conflicting(
        in_flight: &[Arc<FrameRun>],
        reads: &HashSet<ResourceId>,
        writes: &HashSet<ResourceId>,
    ) -> Vec<(u64, Fence)> {
        in_flight
            .iter()
            .filter(|run| !run.fence.is_done() && run.conflicts_with(reads, writes))
            .map(|run| (run.index, run.fence.clone()))
            .collect()
    }

    /// Block until every in-flight frame finished.
    pub(crate) fn drain(&self) {
        let fences: Vec<Fence> = self
            .in_flight
            .lock()
            .iter()
            .map(|run| run.fence.clone())
            .collect();
        for fence in fences {
            fence.wait();
        }
    }
}

/// Handle to a submitted frame.
///
/// Poll it with [`FrameFence::is_done`] or block with [`FrameFence::wait`];
/// either way the frame runs to completion, there is no cancellation.
#[must_use = "dropping a FrameFence discards the frame's error report"]
#[derive(Debug)]
pub struct FrameFence {
    run: Arc<FrameRun>,
}

impl FrameFence {
    pub(crate) fn new(run: Arc<FrameRun>) -> Self {
        Self { run }
    }

    /// Index of the frame, counting submissions to one scheduler.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.run.index
    }

    /// Number of jobs in the frame.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.run.graph.len()
    }

    /// Non-blocking poll.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.run.fence.is_done()
    }

    /// The underlying completion fence, e.g. to hand to another thread.
    #[must_use]
    pub fn fence(&self) -> &Fence {
        &self.run.fence
    }

    /// Block until every job finished and collect the report.
    pub fn wait(self) -> FrameReport {
        self.run.fence.wait();
        self.run.report()
    }

    /// Collect the report if the frame already finished, otherwise hand the
    /// fence back.
    ///
    /// # Errors
    /// Returns `self` while jobs are still outstanding.
    pub fn try_wait(self) -> Result<FrameReport, Self> {
        if self.is_done() {
            Ok(self.run.report())
        } else {
            Err(self)
        }
    }
}

/// Outcome of one frame.
#[must_use]
#[derive(Debug)]
pub struct FrameReport {
    /// Frame index.
    pub frame: u64,
    /// Jobs in the frame's graph.
    pub jobs: usize,
    /// Jobs that ran, failed ones included.
    pub executed: usize,
    /// Failures, one per failing job (plus access violations, if checked).
    pub errors: Vec<JobError>,
    /// Wall time from submission to the last completion.
    pub elapsed: Duration,
    /// Whether `elapsed` exceeded the configured frame budget.
    pub over_budget: bool,
}

impl FrameReport {
    /// No job failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn a report with failures into an error.
    ///
    /// # Errors
    /// If any job failed.
    pub fn into_result(self) -> Result<Self, FrameError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(FrameError {
                frame: self.frame,
                elapsed: self.elapsed,
                errors: self.errors,
            })
        }
    }
}
