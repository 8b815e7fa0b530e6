//! Fixed pool of workers executing frame graphs.
//!
//! ```text
//!   submit(graph)
//!        │ roots, round-robin
//!        ▼
//!   ┌─────────┐ ┌─────────┐     ┌─────────┐
//!   │ seeds 0 │ │ seeds 1 │ ... │ seeds N │   Injector per worker
//!   └────┬────┘ └────┬────┘     └────┬────┘
//!        ▼           ▼               ▼
//!   ┌─────────┐ ┌─────────┐     ┌─────────┐
//!   │ deque 0 │◄┤ deque 1 │◄...─┤ deque N │   LIFO for the owner,
//!   └─────────┘ └─────────┘     └─────────┘   FIFO for thieves
//! ```
//!
//! A worker that finishes a job pushes every dependent it released onto its
//! own deque, so a dependency chain tends to stay on one core while idle
//! workers steal the breadth.

mod rng;
mod stats;
mod worker;

pub use stats::{StatsSnapshot, WorkerSnapshot};

use crate::{
    access::AccessTracker,
    config::SchedulerConfig,
    error::ConfigError,
    frame::{FrameFence, FrameGate, FrameReport, FrameRun},
    graph::{ExecutableGraph, GraphBuilder, JobState},
    types::JobId,
};
use crossbeam_deque::{Injector, Stealer, Worker};
use crossbeam_utils::{
    CachePadded,
    sync::{Parker, Unparker},
};
use stats::WorkerStats;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

/// One job of one frame, as carried by the deques.
pub(crate) struct Task {
    run: Arc<FrameRun>,
    job: JobId,
}

/// State shared by the scheduler handle and every worker.
struct Shared {
    /// Entry points for submitted roots, one per worker.
    seeds: Box<[Injector<Task>]>,
    /// Thief ends of the workers' deques, by worker index.
    stealers: Box<[Stealer<Task>]>,
    unparkers: Box<[Unparker]>,
    next_unpark: AtomicUsize,
    next_seed: AtomicUsize,
    next_frame: AtomicU64,
    done: AtomicBool,
    gate: Arc<FrameGate>,
    access: Option<AccessTracker>,
    stats: Box<[CachePadded<WorkerStats>]>,
    config: SchedulerConfig,
}

impl Shared {
    fn unpark_one(&self) {
        let n = self.unparkers.len();
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % n;
        self.unparkers[idx].unpark();
    }

    fn unpark_all(&self) {
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }
}

/// Work-stealing job scheduler.
///
/// Owns its worker threads for its whole lifetime. Dropping it waits for
/// every submitted frame to finish, then stops the workers.
#[must_use]
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers())
            .field("frames_in_flight", &self.frames_in_flight())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start `config.workers` workers. They park until work arrives.
    ///
    /// # Errors
    /// If the configuration is invalid or a worker thread cannot be spawned.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let workers = config.workers;

        let mut locals = Vec::with_capacity(workers);
        let mut stealers = Vec::with_capacity(workers);
        let mut parkers = Vec::with_capacity(workers);
        let mut unparkers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let local = Worker::new_lifo();
            stealers.push(local.stealer());
            locals.push(local);
            let parker = Parker::new();
            unparkers.push(parker.unparker().clone());
            parkers.push(parker);
        }

        let thread_name = config.thread_name.clone();
        let access = config.access_checks.enabled().then(AccessTracker::default);
        let shared = Arc::new(Shared {
            seeds: (0..workers).map(|_| Injector::new()).collect(),
            stealers: stealers.into_boxed_slice(),
            unparkers: unparkers.into_boxed_slice(),
            next_unpark: AtomicUsize::new(0),
            next_seed: AtomicUsize::new(0),
            next_frame: AtomicU64::new(0),
            done: AtomicBool::new(false),
            gate: Arc::default(),
            access,
            stats: (0..workers).map(|_| WorkerStats::padded()).collect(),
            config,
        });

        let mut scheduler = Self {
            shared,
            threads: Vec::with_capacity(workers),
        };
        for (index, (local, parker)) in locals.into_iter().zip(parkers).enumerate() {
            let shared = Arc::clone(&scheduler.shared);
            let spawned = thread::Builder::new()
                .name(format!("{thread_name}-{index}"))
                .spawn(move || worker::run(index, &local, &parker, &shared));
            match spawned {
                Ok(handle) => scheduler.threads.push(handle),
                // Dropping `scheduler` stops the workers spawned so far.
                Err(err) => {
                    return Err(ConfigError::Spawn {
                        worker: index,
                        message: err.to_string(),
                    });
                }
            }
        }
        tracing::debug!(
            workers,
            access_checks = scheduler.shared.access.is_some(),
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// Scheduler with [`SchedulerConfig::default`].
    ///
    /// # Errors
    /// If a worker thread cannot be spawned.
    pub fn with_default_config() -> Result<Self, ConfigError> {
        Self::new(SchedulerConfig::default())
    }

    /// Builder for the next frame.
    ///
    /// Its `finalize` waits for frames still running on this scheduler that
    /// conflict with the new graph's accesses.
    pub fn build_frame_graph(&self) -> GraphBuilder {
        GraphBuilder::with_gate(Some(Arc::clone(&self.shared.gate)))
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Frames submitted and not finished yet.
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.shared.gate.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::collect(
            self.shared.next_frame.load(Ordering::Relaxed),
            &self.shared.stats,
        )
    }

    /// Start a frame and return immediately.
    ///
    /// Blocks first while a frame still in flight conflicts with the
    /// graph's accesses, so it must not be called from inside a job. The
    /// graph's roots are then spread round-robin over the workers' seed
    /// queues. The returned fence reports completion.
    pub fn submit(&self, graph: ExecutableGraph) -> FrameFence {
        let shared = &*self.shared;
        let frame = shared.next_frame.fetch_add(1, Ordering::Relaxed);
        let run = Arc::new(FrameRun::new(frame, graph, shared.config.frame_budget));
        if run.graph.is_empty() {
            tracing::debug!(frame, "empty frame completed on submit");
            return FrameFence::new(run);
        }
        shared.gate.admit(&run);
        tracing::debug!(
            frame,
            graph = run.graph.serial(),
            jobs = run.graph.len(),
            roots = run.graph.roots().len(),
            "frame submitted"
        );

        let workers = shared.seeds.len();
        for &job in run.graph.roots() {
            run.graph.slots[job.index()].transition(job, JobState::Pending, JobState::Ready);
            let target = shared.next_seed.fetch_add(1, Ordering::Relaxed) % workers;
            shared.seeds[target].push(Task {
                run: Arc::clone(&run),
                job,
            });
            shared.unparkers[target].unpark();
        }
        FrameFence::new(run)
    }

    /// Run a frame to completion.
    ///
    /// Must not be called from inside a job.
    pub fn submit_and_wait(&self, graph: ExecutableGraph) -> FrameReport {
        self.submit(graph).wait()
    }

    /// Wait for in-flight frames, then stop and join the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.gate.drain();
        self.shared.done.store(true, Ordering::Release);
        self.shared.unpark_all();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::debug!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
