//! Per-frame job system: a work-stealing scheduler for DAGs of short jobs.
//!
//! Every frame the caller declares jobs together with the resources they
//! read and write, finalizes the graph and submits it. The crate:
//! - Derives ordering edges from conflicting resource accesses (read after
//!   write, write after write, write after read) in declaration order, and
//!   merges them with explicit dependencies.
//! - Validates the graph eagerly: cycles are rejected with the jobs that
//!   form them, before anything runs.
//! - Runs jobs on a fixed pool of workers, each owning a Chase-Lev deque.
//!   Idle workers steal from random victims.
//! - Distinguishes between dependents with a single predecessor (owned) and
//!   those with several (shared). Only the latter pay for an atomic
//!   counter, decremented between a Release and an Acquire fence so every
//!   job observes its predecessors' writes.
//!
//! Key modules:
//! - `graph`: `GraphBuilder` (declaration, hazards, toposort) and the
//!   frozen `ExecutableGraph`.
//! - `scheduler`: the worker pool and `Scheduler::submit`.
//! - `frame`: `FrameFence` and `FrameReport`, the result of a submission.
//! - `fence`: `WaitCounter` and the blocking `Fence`.
//! - `job`: the `Job` trait, `JobDesc` and the `JobContext` passed to jobs.
//!
//! Quick start:
//! 1. Create a `Scheduler` once.
//! 2. Each frame, call `Scheduler::build_frame_graph`, declare jobs with
//!    `GraphBuilder::declare` or `GraphBuilder::insert`, then `finalize`.
//! 3. `Scheduler::submit` the graph and `wait` on the returned fence, or
//!    keep working and poll `is_done`.
//!
//! Failing or panicking jobs do not stall the frame: their errors are
//! collected in the `FrameReport` and their dependents still run.

mod access;
/// Scheduler configuration.
///
/// `SchedulerConfig` with its defaults and validation, and `AccessChecks`
/// selecting when resource-access instrumentation runs.
pub mod config;
/// Error types of graph building, job execution and configuration.
pub mod error;
/// Completion counters: the per-job `WaitCounter` and the shared `Fence`.
pub mod fence;
/// Frame handles and reports.
pub mod frame;
/// Frame graph construction and validation.
///
/// `GraphBuilder` collects jobs, derives hazard edges from their declared
/// accesses, orders them topologically and produces an `ExecutableGraph`.
pub mod graph;
/// The unit of work: `Job`, `JobDesc`, `JobHandle`, `JobContext`.
pub mod job;
/// The work-stealing worker pool.
pub mod scheduler;
mod sync;
/// Ids shared across the crate (`JobId`, `ResourceId`, `ScopeId`) and the
/// `SyncUnsafeCell` primitive used internally.
pub mod types;

pub use config::{AccessChecks, SchedulerConfig};
pub use error::{ConfigError, FrameError, GraphError, JobError};
pub use fence::{Fence, WaitCounter};
pub use frame::{FrameFence, FrameReport};
pub use graph::{ExecutableGraph, GraphBuilder};
pub use job::{Job, JobContext, JobDesc, JobHandle, JobResult, Priority};
pub use scheduler::{Scheduler, StatsSnapshot};
pub use types::{JobId, ResourceId, ScopeId};
