use super::{Shared, Task, rng::XorShift64};
use crate::{
    access::Holder,
    error::{AccessViolation, JobError},
    frame::FrameRun,
    graph::JobState,
    job::{Job, JobContext, JobResult},
    sync::{Ordering as FenceOrdering, fence},
    types::JobId,
};
use core::{any::Any, cmp::Reverse};
use crossbeam_deque::{Steal, Worker};
use crossbeam_utils::sync::Parker;
use smallvec::SmallVec;
use std::{
    borrow::Cow,
    iter,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, atomic::Ordering},
    thread,
};

/// Local pushes after which a sibling is woken even if every completion
/// released a single dependent.
const WAKE_ON_HOARD: usize = 32;

struct WorkerCtx<'a> {
    index: usize,
    local: &'a Worker<Task>,
    shared: &'a Shared,
    rng: XorShift64,
    /// Local pushes since the last wake-up of a sibling.
    hoarded: usize,
}

/// Worker thread body.
///
/// Looks for work in this order: own deque, own seed queue, other seed
/// queues, random victims. With nothing found it spins for
/// `spin_iters` rounds, then parks for at most `park_timeout` per round,
/// yielding every 16th round.
pub(super) fn run(index: usize, local: &Worker<Task>, parker: &Parker, shared: &Shared) {
    let span = tracing::debug_span!("worker", id = index);
    let _enter = span.enter();
    tracing::debug!("worker started");

    let config = &shared.config;
    let mut ctx = WorkerCtx {
        index,
        local,
        shared,
        rng: XorShift64::for_worker(config.seed, index),
        hoarded: 0,
    };
    let mut idle_rounds = 0u32;
    loop {
        if let Some(task) = ctx.find_task() {
            idle_rounds = 0;
            ctx.execute(task);
            continue;
        }
        if shared.done.load(Ordering::Acquire) {
            break;
        }
        idle_rounds = idle_rounds.saturating_add(1);
        if idle_rounds <= config.spin_iters {
            std::hint::spin_loop();
            continue;
        }
        if idle_rounds & 0xF == 0 {
            thread::yield_now();
        }
        shared.stats[index].parked();
        parker.park_timeout(config.park_timeout);
    }
    tracing::debug!("worker stopped");
}

/// Retry a steal until it resolves to a job or to an empty source.
fn settle(mut attempt: impl FnMut() -> Steal<Task>) -> Option<Task> {
    iter::repeat_with(&mut attempt)
        .find(|steal| !steal.is_retry())
        .and_then(Steal::success)
}

impl WorkerCtx<'_> {
    fn find_task(&mut self) -> Option<Task> {
        if let Some(task) = self.local.pop() {
            return Some(task);
        }
        let seeds = &self.shared.seeds;
        let n = seeds.len();
        for offset in 0..n {
            let queue = &seeds[(self.index + offset) % n];
            if let Some(task) = settle(|| queue.steal_batch_and_pop(self.local)) {
                return Some(task);
            }
        }
        self.steal()
    }

    /// Probe `steal_tries` random victims, never ourselves.
    fn steal(&mut self) -> Option<Task> {
        let n = self.shared.stealers.len();
        if n < 2 {
            return None;
        }
        let stats = &self.shared.stats[self.index];
        for _ in 0..self.shared.config.steal_tries {
            let mut victim = self.rng.next_usize(n - 1);
            if victim >= self.index {
                victim += 1;
            }
            let stolen = settle(|| self.shared.stealers[victim].steal_batch_and_pop(self.local));
            stats.steal_attempt(stolen.is_some());
            if let Some(task) = stolen {
                tracing::trace!(victim, "stole job");
                return Some(task);
            }
        }
        None
    }

    fn execute(&mut self, task: Task) {
        let Task { run, job } = task;
        let graph = &run.graph;
        let slot = &graph.slots[job.index()];
        slot.transition(job, JobState::Ready, JobState::Running);
        // SAFETY: the transition above succeeds for exactly one worker.
        let body = unsafe { slot.take_body() }.expect("WorkerCtx::execute: body taken twice");

        let tracker = self.shared.access.as_ref();
        let holder = Holder {
            frame: run.index,
            job,
        };
        let violations = tracker
            .map(|tracker| tracker.acquire(holder, &slot.reads, &slot.writes))
            .unwrap_or_default();
        for violation in &violations {
            tracing::error!(
                frame = run.index,
                %job,
                name = %slot.name,
                %violation,
                "resource access overlap"
            );
        }

        let ctx = JobContext {
            job,
            name: &slot.name,
            frame: run.index,
            worker: self.index,
            reads: &slot.reads,
            writes: &slot.writes,
            checks: tracker.is_some(),
        };
        let error = run_job(body, &ctx, &slot.name, violations);
        match &error {
            Some(error @ JobError::ResourceConflict(_)) => {
                tracing::error!(frame = run.index, %error, "job broke its access contract");
            }
            Some(error) => tracing::warn!(frame = run.index, %error, "job failed"),
            None => {}
        }
        let failed = error.is_some();
        if let Some(error) = error {
            run.record_error(error);
        }

        if let Some(tracker) = tracker {
            tracker.release(holder, &slot.reads, &slot.writes);
        }
        slot.transition(job, JobState::Running, JobState::Completed);
        self.shared.stats[self.index].executed(failed);

        self.release_dependents(&run, job);
        run.record_completion();
        if let Some(scope) = slot.scope {
            graph.scopes[scope.0 as usize].signal_one_complete();
        }
        if run.fence.signal_one_complete() {
            self.finish_frame(&run);
        }
    }

    /// Make the dependents `job` was the last predecessor of ready and push
    /// them onto the local deque.
    fn release_dependents(&mut self, run: &Arc<FrameRun>, job: JobId) {
        let graph = &run.graph;
        let children = &graph.children[job.index()];
        let mut ready: SmallVec<[JobId; 8]> = children.owned.iter().copied().collect();
        if !children.shared.is_empty() {
            let owned = ready.len();
            fence(FenceOrdering::Release);
            ready.extend(
                children
                    .shared
                    .iter()
                    .copied()
                    .filter(|child| graph.counters[child.index()].decrement_relaxed()),
            );
            if ready.len() > owned {
                fence(FenceOrdering::Acquire);
            }
        }
        if ready.is_empty() {
            return;
        }

        ready.sort_unstable_by_key(|child| (Reverse(graph.slots[child.index()].priority), *child));
        for &child in &ready {
            graph.slots[child.index()].transition(child, JobState::Pending, JobState::Ready);
        }
        // Reversed: the owner pops from the back.
        for &child in ready.iter().rev() {
            self.local.push(Task {
                run: Arc::clone(run),
                job: child,
            });
        }
        self.hoarded += ready.len();
        if ready.len() > 1 || self.hoarded >= WAKE_ON_HOARD {
            self.hoarded = 0;
            self.shared.unpark_one();
        }
    }

    fn finish_frame(&self, run: &FrameRun) {
        self.shared.gate.retire(run.index);
        let elapsed = run.elapsed();
        if run.over_budget() {
            tracing::warn!(
                frame = run.index,
                ?elapsed,
                budget = ?self.shared.config.frame_budget,
                "frame over budget"
            );
        } else {
            tracing::debug!(frame = run.index, ?elapsed, "frame finished");
        }
    }
}

/// Run `body` unless its accesses overlap a running job. An overlapping
/// job is skipped and its first violation is its only error.
fn run_job(
    body: Box<dyn Job>,
    ctx: &JobContext<'_>,
    name: &Cow<'static, str>,
    violations: Vec<AccessViolation>,
) -> Option<JobError> {
    if let Some(violation) = violations.into_iter().next() {
        return Some(violation.into());
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body.run(ctx)));
    job_error(ctx.job, name, outcome)
}

fn job_error(
    job: JobId,
    name: &Cow<'static, str>,
    outcome: thread::Result<JobResult>,
) -> Option<JobError> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(source)) => Some(JobError::Failed {
            job,
            name: name.clone(),
            source,
        }),
        Err(payload) => Some(match payload.downcast::<AccessViolation>() {
            Ok(violation) => JobError::ResourceConflict(*violation),
            Err(payload) => JobError::Panicked {
                job,
                name: name.clone(),
                message: panic_message(&*payload),
            },
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceId;
    use std::io;

    fn name() -> Cow<'static, str> {
        Cow::Borrowed("physics")
    }

    fn context(job: JobId) -> JobContext<'static> {
        JobContext {
            job,
            name: "physics",
            frame: 0,
            worker: 0,
            reads: &[],
            writes: &[],
            checks: true,
        }
    }

    fn overlap(resource: u64) -> AccessViolation {
        AccessViolation::Overlap {
            job: JobId::from_index(4),
            holder: JobId::from_index(0),
            holder_frame: 1,
            resource: ResourceId::new(resource),
            kind: crate::error::AccessKind::Write,
        }
    }

    #[test]
    fn overlapping_job_is_skipped_with_one_error() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let body: Box<dyn Job> = Box::new({
            let ran = Arc::clone(&ran);
            move |_: &JobContext<'_>| -> JobResult {
                ran.store(true, Ordering::Relaxed);
                Err("also failed".into())
            }
        });
        let ctx = context(JobId::from_index(4));
        let error = run_job(body, &ctx, &name(), vec![overlap(1), overlap(2)]);
        assert_eq!(error.map(|e| e.to_string()), Some(JobError::from(overlap(1)).to_string()));
        assert!(!ran.load(Ordering::Relaxed));
    }

    #[test]
    fn job_without_overlap_runs() {
        let body: Box<dyn Job> = Box::new(|_: &JobContext<'_>| -> JobResult { Err("failed".into()) });
        let ctx = context(JobId::from_index(5));
        let error = run_job(body, &ctx, &name(), Vec::new()).unwrap();
        assert!(matches!(error, JobError::Failed { .. }));
        assert_eq!(error.job(), JobId::from_index(5));
    }

    #[test]
    fn successful_outcome_is_not_an_error() {
        assert!(job_error(JobId::from_index(0), &name(), Ok(Ok(()))).is_none());
    }

    #[test]
    fn returned_error_becomes_failed() {
        let source: crate::error::BoxError = Box::new(io::Error::other("disk on fire"));
        let error = job_error(JobId::from_index(1), &name(), Ok(Err(source))).unwrap();
        assert!(matches!(error, JobError::Failed { .. }));
        assert_eq!(error.job(), JobId::from_index(1));
        assert!(error.to_string().contains("disk on fire"));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let outcome = panic::catch_unwind(|| -> JobResult { panic!("boom {}", 7) });
        let error = job_error(JobId::from_index(2), &name(), outcome).unwrap();
        match error {
            JobError::Panicked { message, .. } => assert_eq!(message, "boom 7"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn access_violation_payload_becomes_conflict() {
        let violation = AccessViolation::Undeclared {
            job: JobId::from_index(3),
            resource: ResourceId::new(9),
            kind: crate::error::AccessKind::Write,
        };
        let expected = violation.clone();
        let outcome = panic::catch_unwind(move || -> JobResult { panic::panic_any(violation) });
        let error = job_error(JobId::from_index(3), &name(), outcome).unwrap();
        match error {
            JobError::ResourceConflict(found) => assert_eq!(found, expected),
            other => panic!("unexpected {other:?}"),
        }
    }
}
